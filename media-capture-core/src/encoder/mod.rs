pub mod command;
pub mod mp4_encoder;
