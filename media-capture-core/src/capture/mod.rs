pub mod audio_source;
pub mod video_source;
