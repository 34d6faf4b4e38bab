use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;
use super::format::{AudioFormat, ShareMode, WaveFormat};

/// Settings for the paced display capture loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoCaptureConfig {
    /// Output cadence in frames per second (default: 60).
    pub frame_rate: f64,

    /// Bound on frames waiting for the encoder (default: 120).
    pub queue_capacity: usize,

    /// How long one acquire may wait for a new desktop image. The loop keeps
    /// its own cadence, so the default of 0 polls.
    pub acquire_timeout_ms: u32,
}

impl VideoCaptureConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(CaptureError::ConfigurationFailed(format!(
                "frame rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.frame_rate > 1000.0 {
            return Err(CaptureError::ConfigurationFailed(format!(
                "frame rate {} is above 1000 fps",
                self.frame_rate
            )));
        }
        if self.queue_capacity == 0 {
            return Err(CaptureError::ConfigurationFailed(
                "video queue capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms as u64)
    }
}

impl Default for VideoCaptureConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60.0,
            queue_capacity: 120,
            acquire_timeout_ms: 0,
        }
    }
}

/// Settings for audio capture and conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioCaptureConfig {
    /// Encoding handed to the encoder. Only 16-bit PCM is implemented.
    pub output_format: AudioFormat,

    /// Output sample rate in Hz, 0 keeps the device rate.
    pub sample_rate: u32,

    /// Output channel count, 0 keeps the device layout.
    pub channels: u16,

    /// Device buffer length requested from the audio client.
    pub buffer_duration_ms: u32,

    pub share_mode: ShareMode,
}

impl AudioCaptureConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate != 0 && !(8_000..=384_000).contains(&self.sample_rate) {
            return Err(CaptureError::ConfigurationFailed(format!(
                "unsupported sample rate: {}",
                self.sample_rate
            )));
        }
        if self.channels > 8 {
            return Err(CaptureError::ConfigurationFailed(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if self.buffer_duration_ms == 0 || self.buffer_duration_ms > 2_000 {
            return Err(CaptureError::ConfigurationFailed(format!(
                "buffer duration must be within 1..=2000 ms, got {}",
                self.buffer_duration_ms
            )));
        }
        Ok(())
    }

    /// Resolves the format produced for a given device format, filling the
    /// "keep source" zeros from `source`.
    pub fn target_format(&self, source: &WaveFormat) -> WaveFormat {
        WaveFormat {
            encoding: self.output_format.encoding(),
            sample_rate: if self.sample_rate == 0 {
                source.sample_rate
            } else {
                self.sample_rate
            },
            channels: if self.channels == 0 {
                source.channels
            } else {
                self.channels
            },
            bits_per_sample: self.output_format.bits_per_sample(),
        }
    }

    pub fn buffer_duration(&self) -> Duration {
        Duration::from_millis(self.buffer_duration_ms as u64)
    }
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            output_format: AudioFormat::Pcm16,
            sample_rate: 0,
            channels: 0,
            buffer_duration_ms: 100,
            share_mode: ShareMode::Shared,
        }
    }
}

/// External encoder invocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder executable, resolved through `PATH` when relative.
    pub program: PathBuf,
    pub video_codec: String,
    pub audio_codec: String,
    /// Pixel format of the encoded video stream.
    pub pixel_format: String,
    pub overwrite: bool,
    /// Move the MP4 index before the media data.
    pub fast_start: bool,
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.program.as_os_str().is_empty() {
            return Err(CaptureError::ConfigurationFailed(
                "encoder program must not be empty".into(),
            ));
        }
        if self.video_codec.trim().is_empty() || self.audio_codec.trim().is_empty() {
            return Err(CaptureError::ConfigurationFailed(
                "encoder codecs must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
            pixel_format: "yuv420p".into(),
            overwrite: true,
            fast_start: true,
        }
    }
}

/// Everything a recording needs, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub video: VideoCaptureConfig,
    pub audio: AudioCaptureConfig,
    pub encoder: EncoderConfig,

    /// Global monitor index across all adapters.
    pub monitor_index: usize,

    /// Audio endpoint id; `None` records the default output in loopback.
    pub audio_device_id: Option<String>,

    /// Output file; `None` picks a timestamped name in the working directory.
    pub output_path: Option<PathBuf>,
}

impl RecorderConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CaptureError::ConfigurationFailed(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        self.video.validate()?;
        self.audio.validate()?;
        self.encoder.validate()
    }

    /// The configured output path, or `output_YYYYMMDD_HHMMSS.mp4` for now.
    pub fn resolved_output_path(&self) -> PathBuf {
        match &self.output_path {
            Some(path) => path.clone(),
            None => default_output_name(chrono::Local::now().naive_local()),
        }
    }
}

pub fn default_output_name(at: chrono::NaiveDateTime) -> PathBuf {
    PathBuf::from(format!("output_{}.mp4", at.format("%Y%m%d_%H%M%S")))
}
