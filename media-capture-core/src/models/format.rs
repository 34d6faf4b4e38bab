use std::fmt;

use serde::{Deserialize, Serialize};

/// How samples in a wave buffer are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// Signed integer PCM (unsigned for 8-bit).
    Pcm,
    /// IEEE float, 32 or 64 bits.
    IeeeFloat,
}

/// Description of an interleaved audio buffer as delivered by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaveFormat {
    pub encoding: SampleEncoding,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding: SampleEncoding::Pcm,
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }

    pub fn ieee_float(sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding: SampleEncoding::IeeeFloat,
            sample_rate,
            channels,
            bits_per_sample: 32,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Bytes per sample frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }
}

impl fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.encoding {
            SampleEncoding::Pcm => "PCM",
            SampleEncoding::IeeeFloat => "float",
        };
        write!(
            f,
            "{} Hz, {} ch, {}-bit {}",
            self.sample_rate, self.channels, self.bits_per_sample, kind
        )
    }
}

/// Target encoding requested for the audio stream handed to the encoder.
///
/// Only `Pcm16` has a converter; the others are accepted by configuration
/// parsing and rejected with `UnsupportedFormat` when a source is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Pcm16,
    Pcm24,
    Pcm32,
    Float32,
}

impl AudioFormat {
    pub fn bits_per_sample(&self) -> u16 {
        match self {
            Self::Pcm16 => 16,
            Self::Pcm24 => 24,
            Self::Pcm32 | Self::Float32 => 32,
        }
    }

    pub fn encoding(&self) -> SampleEncoding {
        match self {
            Self::Float32 => SampleEncoding::IeeeFloat,
            _ => SampleEncoding::Pcm,
        }
    }

    /// Raw demuxer name the encoder expects for this sample layout.
    pub fn raw_demuxer(&self) -> &'static str {
        match self {
            Self::Pcm16 => "s16le",
            Self::Pcm24 => "s24le",
            Self::Pcm32 => "s32le",
            Self::Float32 => "f32le",
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::Pcm16
    }
}

/// Audio client sharing mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    #[default]
    Shared,
    Exclusive,
}

/// Data-flow direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioDirection {
    /// Playback endpoint; captured in loopback mode.
    Render,
    /// Recording endpoint such as a microphone.
    Capture,
}

impl fmt::Display for AudioDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render => f.write_str("output"),
            Self::Capture => f.write_str("input"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_align_and_rate() {
        let format = WaveFormat::ieee_float(48000, 2);
        assert_eq!(format.block_align(), 8);
        assert_eq!(format.bytes_per_second(), 384_000);
        assert_eq!(WaveFormat::pcm16(44100, 1).block_align(), 2);
    }

    #[test]
    fn audio_format_demuxer_names() {
        assert_eq!(AudioFormat::Pcm16.raw_demuxer(), "s16le");
        assert_eq!(AudioFormat::default(), AudioFormat::Pcm16);
        assert_eq!(AudioFormat::Float32.encoding(), SampleEncoding::IeeeFloat);
    }

    #[test]
    fn audio_format_deserializes_lowercase() {
        let format: AudioFormat = serde_json::from_str("\"pcm24\"").unwrap();
        assert_eq!(format, AudioFormat::Pcm24);
    }
}
