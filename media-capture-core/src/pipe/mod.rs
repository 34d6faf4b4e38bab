//! Raw stream sources and the OS pipes that carry them to the encoder.

pub mod audio_pipe;
mod drain;
pub mod video_pipe;

#[cfg(unix)]
mod fifo;
#[cfg(windows)]
mod named_pipe;

#[cfg(unix)]
pub use fifo::InputPipe;
#[cfg(windows)]
pub use named_pipe::InputPipe;
