pub mod audio_device;
pub mod display_device;
pub mod enumerator;
pub mod pipe_source;
pub mod pipeline_delegate;
