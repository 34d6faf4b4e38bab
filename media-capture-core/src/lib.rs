//! # media-capture-core
//!
//! Platform-agnostic screen + system audio recording engine.
//!
//! Provides frame pacing, bounded/unbounded hand-off queues, PCM16
//! conversion, lazily connected encoder pipes, and the pipeline that
//! orchestrates an external ffmpeg process. Platform backends (Windows DXGI
//! duplication and WASAPI) implement the `DisplayDeviceFactory` and
//! `AudioCaptureDevice` traits and plug into the generic `Pipeline`.
//!
//! ## Architecture
//!
//! ```text
//! media-capture-core (this crate)
//! ├── traits/       ← DisplayDevice, AudioCaptureDevice, DeviceEnumerator, PipeSource, PipelineDelegate
//! ├── models/       ← CaptureError, VideoFrame, AudioSample, WaveFormat, configs, states
//! ├── processing/   ← MediaQueue, FramePacer, Pcm16Converter, CancellationToken
//! ├── capture/      ← VideoSource (paced duplication loop), AudioSource (callback ingestion)
//! ├── pipe/         ← VideoPipeSource, AudioPipeSource, named pipe / FIFO endpoints
//! ├── encoder/      ← EncoderCommandBuilder, Mp4Encoder
//! └── session/      ← Pipeline (lifecycle orchestrator)
//! ```

pub mod capture;
pub mod encoder;
pub mod models;
pub mod pipe;
pub mod processing;
pub mod session;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export key types at crate root for convenience.
pub use capture::audio_source::AudioSource;
pub use capture::video_source::VideoSource;
pub use encoder::command::EncoderCommandBuilder;
pub use encoder::mp4_encoder::{EncodeJob, EncodeReport, Mp4Encoder};
pub use models::config::{AudioCaptureConfig, EncoderConfig, RecorderConfig, VideoCaptureConfig};
pub use models::devices::{AudioDeviceInfo, MonitorDescriptor, Rotation};
pub use models::diagnostics::{AudioDiagnostics, CaptureDiagnostics, PipeStats};
pub use models::error::CaptureError;
pub use models::format::{AudioDirection, AudioFormat, SampleEncoding, ShareMode, WaveFormat};
pub use models::frame::{AudioSample, MediaClock, MediaTimestamp, PixelFormat, VideoFrame};
pub use models::state::{CaptureState, PipelineState};
pub use pipe::audio_pipe::AudioPipeSource;
pub use pipe::video_pipe::VideoPipeSource;
pub use processing::cancellation::CancellationToken;
pub use processing::media_queue::{AudioSampleStream, MediaQueue, PushOutcome, QueueReader, VideoFrameStream};
pub use processing::pcm16_converter::{AudioConverter, Pcm16Converter, Resampler};
pub use session::pipeline::Pipeline;
pub use traits::audio_device::{AudioBufferCallback, AudioCaptureDevice};
pub use traits::display_device::{AcquireOutcome, DisplayDevice, DisplayDeviceFactory, FrameGeneration};
pub use traits::enumerator::DeviceEnumerator;
pub use traits::pipe_source::{PipeSource, StreamRole};
pub use traits::pipeline_delegate::PipelineDelegate;
