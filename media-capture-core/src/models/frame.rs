use std::fmt;
use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Pixel layout of captured video. Desktop duplication always hands out BGRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Bgra32 => 4,
        }
    }

    /// Name of the format on the encoder's `-pix_fmt` flag.
    pub fn encoder_name(&self) -> &'static str {
        match self {
            Self::Bgra32 => "bgra",
        }
    }
}

/// Monotonic media time in microseconds, relative to a [`MediaClock`] origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediaTimestamp(u64);

impl MediaTimestamp {
    pub const ZERO: Self = Self(0);

    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration.as_micros().min(u64::MAX as u128) as u64)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.0)
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl Add for MediaTimestamp {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for MediaTimestamp {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for MediaTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Stamps media with the time elapsed since the clock was created.
///
/// Cloning keeps the origin, so every producer of one recording shares it.
#[derive(Debug, Clone, Copy)]
pub struct MediaClock {
    origin: Instant,
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> MediaTimestamp {
        MediaTimestamp::from_duration(self.origin.elapsed())
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

/// One captured desktop image, tightly packed (no row padding).
///
/// Invariant: `data.len() == width * height * 4`.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    timestamp: MediaTimestamp,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp: MediaTimestamp) -> Result<Self, CaptureError> {
        let format = PixelFormat::Bgra32;
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidBuffer(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        if data.len() != expected {
            return Err(CaptureError::InvalidBuffer(format!(
                "{}x{} BGRA frame needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
            timestamp,
        })
    }

    /// Deep copy of this frame's pixels under a new timestamp.
    pub fn duplicate(&self, timestamp: MediaTimestamp) -> Self {
        Self {
            width: self.width,
            height: self.height,
            format: self.format,
            data: self.data.clone(),
            timestamp,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn timestamp(&self) -> MediaTimestamp {
        self.timestamp
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// One chunk of interleaved PCM as delivered by a capture callback.
///
/// Invariant: `data.len() % (channels * bits_per_sample / 8) == 0`.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioSample {
    data: Vec<u8>,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    timestamp: MediaTimestamp,
}

impl AudioSample {
    pub fn new(
        data: Vec<u8>,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
        timestamp: MediaTimestamp,
    ) -> Result<Self, CaptureError> {
        if channels == 0 || sample_rate == 0 {
            return Err(CaptureError::InvalidBuffer(format!(
                "audio needs channels and sample rate, got {} ch @ {} Hz",
                channels, sample_rate
            )));
        }
        if bits_per_sample == 0 || bits_per_sample % 8 != 0 {
            return Err(CaptureError::InvalidBuffer(format!(
                "unsupported bit depth: {}",
                bits_per_sample
            )));
        }
        let block_align = channels as usize * (bits_per_sample as usize / 8);
        if data.len() % block_align != 0 {
            return Err(CaptureError::InvalidBuffer(format!(
                "{} bytes is not a whole number of {}-byte frames",
                data.len(),
                block_align
            )));
        }
        Ok(Self {
            data,
            channels,
            sample_rate,
            bits_per_sample,
            timestamp,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn timestamp(&self) -> MediaTimestamp {
        self.timestamp
    }

    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Number of sample frames (one sample per channel) in this chunk.
    pub fn frame_count(&self) -> usize {
        self.data.len() / self.block_align()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

impl fmt::Debug for AudioSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSample")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("bits_per_sample", &self.bits_per_sample)
            .field("bytes", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_frame_rejects_wrong_length() {
        let err = VideoFrame::new(4, 2, vec![0; 31], MediaTimestamp::ZERO).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidBuffer(_)));
        assert!(VideoFrame::new(4, 2, vec![0; 32], MediaTimestamp::ZERO).is_ok());
    }

    #[test]
    fn video_frame_rejects_zero_dimensions() {
        assert!(VideoFrame::new(0, 2, Vec::new(), MediaTimestamp::ZERO).is_err());
    }

    #[test]
    fn duplicate_is_deep_copy_with_new_timestamp() {
        let original = VideoFrame::new(2, 1, vec![1, 2, 3, 4, 5, 6, 7, 8], MediaTimestamp::from_micros(10)).unwrap();
        let copy = original.duplicate(MediaTimestamp::from_micros(20));

        assert_eq!(copy.data(), original.data());
        assert_ne!(copy.data().as_ptr(), original.data().as_ptr());
        assert_eq!(copy.timestamp(), MediaTimestamp::from_micros(20));
        assert_eq!((copy.width(), copy.height()), (2, 1));
    }

    #[test]
    fn audio_sample_requires_whole_frames() {
        // 2 channels x 16-bit = 4-byte frames
        assert!(AudioSample::new(vec![0; 8], 2, 48000, 16, MediaTimestamp::ZERO).is_ok());
        assert!(AudioSample::new(vec![0; 6], 2, 48000, 16, MediaTimestamp::ZERO).is_err());
        assert!(AudioSample::new(vec![0; 8], 0, 48000, 16, MediaTimestamp::ZERO).is_err());
    }

    #[test]
    fn audio_sample_frame_count_and_duration() {
        let sample = AudioSample::new(vec![0; 4 * 480], 2, 48000, 16, MediaTimestamp::ZERO).unwrap();
        assert_eq!(sample.frame_count(), 480);
        assert_eq!(sample.duration(), Duration::from_millis(10));
    }

    #[test]
    fn timestamp_arithmetic_saturates() {
        let a = MediaTimestamp::from_micros(1_500);
        let b = MediaTimestamp::from_micros(500);
        assert_eq!((a - b).as_micros(), 1_000);
        assert_eq!((b - a).as_micros(), 0);
        assert_eq!((a + b).as_millis_f64(), 2.0);
    }
}
