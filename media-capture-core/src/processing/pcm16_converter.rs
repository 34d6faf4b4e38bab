use parking_lot::Mutex;

use crate::models::config::AudioCaptureConfig;
use crate::models::error::CaptureError;
use crate::models::format::{AudioFormat, SampleEncoding, WaveFormat};

/// Converts device buffers into the encoding handed to the encoder.
pub trait AudioConverter: Send + Sync {
    /// Format produced for a buffer in `source` format.
    fn output_format(&self, source: &WaveFormat) -> WaveFormat;

    fn is_conversion_needed(&self, source: &WaveFormat) -> bool {
        self.output_format(source) != *source
    }

    fn convert(&self, data: &[u8], source: &WaveFormat) -> Result<Vec<u8>, CaptureError>;
}

/// Picks the converter for the configured output format.
///
/// Fails with `UnsupportedFormat` for targets without an implementation, so a
/// bad configuration is rejected before any device is started.
pub fn converter_for(config: &AudioCaptureConfig) -> Result<Box<dyn AudioConverter>, CaptureError> {
    match config.output_format {
        AudioFormat::Pcm16 => Ok(Box::new(Pcm16Converter::new(config.sample_rate, config.channels))),
        other => Err(CaptureError::UnsupportedFormat(format!(
            "no converter to {:?}, only 16-bit PCM output is supported",
            other
        ))),
    }
}

/// Converts any integer or float PCM buffer to interleaved 16-bit
/// little-endian PCM, optionally remixing channels and resampling.
///
/// A target rate or channel count of 0 keeps the source value. One converter
/// serves one stream: resampling continues across consecutive buffers.
#[derive(Debug, Default)]
pub struct Pcm16Converter {
    sample_rate: u32,
    channels: u16,
    resampler: Mutex<Option<Resampler>>,
}

impl Pcm16Converter {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            resampler: Mutex::new(None),
        }
    }

    /// Decodes interleaved samples to f32 in `[-1.0, 1.0]`.
    pub fn decode(data: &[u8], source: &WaveFormat) -> Result<Vec<f32>, CaptureError> {
        let width = source.bytes_per_sample();
        if width == 0 || source.channels == 0 || data.len() % source.block_align() != 0 {
            return Err(CaptureError::InvalidBuffer(format!(
                "{} bytes do not hold whole frames of {}",
                data.len(),
                source
            )));
        }

        let samples = data.chunks_exact(width);
        let decoded = match (source.encoding, source.bits_per_sample) {
            (SampleEncoding::Pcm, 8) => samples.map(|b| (b[0] as f32 - 128.0) / 128.0).collect(),
            (SampleEncoding::Pcm, 16) => samples
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
                .collect(),
            (SampleEncoding::Pcm, 24) => samples
                .map(|b| {
                    // Place the three bytes in the top of an i32 and shift back
                    // down to sign-extend.
                    let value = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                    value as f32 / 8_388_608.0
                })
                .collect(),
            (SampleEncoding::Pcm, 32) => samples
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0)
                .collect(),
            (SampleEncoding::IeeeFloat, 32) => samples
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            (SampleEncoding::IeeeFloat, 64) => samples
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
                .collect(),
            _ => {
                return Err(CaptureError::UnsupportedFormat(format!(
                    "cannot decode source format {}",
                    source
                )))
            }
        };
        Ok(decoded)
    }

    /// Maps interleaved frames from `from` channels to `to` channels.
    ///
    /// Mono output averages every input channel. Otherwise output channel `c`
    /// takes input channel `c`, wrapping around when the input has fewer
    /// channels (mono to stereo duplicates).
    pub fn remix(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
        if from == to || from == 0 || to == 0 {
            return samples.to_vec();
        }

        let frame_count = samples.len() / from;
        let mut output = Vec::with_capacity(frame_count * to);
        for frame in samples.chunks_exact(from) {
            if to == 1 {
                output.push(frame.iter().sum::<f32>() / from as f32);
            } else {
                output.extend((0..to).map(|c| frame[c % from]));
            }
        }
        output
    }

    /// f32 samples to 16-bit PCM little-endian bytes, clamping out-of-range values.
    pub fn encode(samples: &[f32]) -> Vec<u8> {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            let value = (clamped * i16::MAX as f32) as i16;
            data.extend_from_slice(&value.to_le_bytes());
        }
        data
    }
}

impl AudioConverter for Pcm16Converter {
    fn output_format(&self, source: &WaveFormat) -> WaveFormat {
        AudioCaptureConfig {
            output_format: AudioFormat::Pcm16,
            sample_rate: self.sample_rate,
            channels: self.channels,
            ..Default::default()
        }
        .target_format(source)
    }

    fn convert(&self, data: &[u8], source: &WaveFormat) -> Result<Vec<u8>, CaptureError> {
        let target = self.output_format(source);
        if target == *source {
            return Ok(data.to_vec());
        }

        let decoded = Self::decode(data, source)?;
        let remixed = Self::remix(&decoded, source.channels as usize, target.channels as usize);
        let channels = target.channels as usize;
        let mut resampler = self.resampler.lock();
        if !resampler
            .as_ref()
            .is_some_and(|r| r.matches(channels, source.sample_rate, target.sample_rate))
        {
            // New stream layout; nothing from the previous one carries over.
            *resampler = None;
        }
        let resampled = resampler
            .get_or_insert_with(|| Resampler::new(channels, source.sample_rate, target.sample_rate))
            .process(&remixed);
        Ok(Self::encode(&resampled))
    }
}

/// Linear interpolation resampler for interleaved audio with any channel
/// count.
///
/// The read position and the last frame carry over between buffers, so a
/// stream split into buffers of any size yields the same frames as the whole
/// stream at once: `target_rate / source_rate` output frames per input frame.
#[derive(Debug, Clone)]
pub struct Resampler {
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    // Next output position in source frames scaled by `target_rate`, relative
    // to the first frame of the next buffer. Negative values lie between
    // `previous` and that frame.
    position: i64,
    previous: Vec<f32>,
}

impl Resampler {
    pub fn new(channels: usize, source_rate: u32, target_rate: u32) -> Self {
        Self {
            channels,
            source_rate,
            target_rate,
            position: 0,
            previous: Vec::new(),
        }
    }

    pub fn matches(&self, channels: usize, source_rate: u32, target_rate: u32) -> bool {
        self.channels == channels && self.source_rate == source_rate && self.target_rate == target_rate
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let channels = self.channels;
        if self.source_rate == self.target_rate || self.source_rate == 0 || self.target_rate == 0 || channels == 0 {
            return samples.to_vec();
        }
        let frame_count = samples.len() / channels;
        if frame_count == 0 {
            return Vec::new();
        }

        let scale = self.target_rate as i64;
        let step = self.source_rate as i64;
        // Interpolating needs the frame after the read position.
        let limit = (frame_count as i64 - 1) * scale;
        let previous = if self.previous.len() == channels {
            &self.previous[..]
        } else {
            &samples[..channels]
        };

        let expected = (frame_count as u64 * self.target_rate as u64 / self.source_rate as u64 + 1) as usize;
        let mut output = Vec::with_capacity(expected * channels);
        let mut position = self.position;
        while position < limit {
            let index = position.div_euclid(scale);
            let fraction = (position.rem_euclid(scale) as f64 / scale as f64) as f32;
            let from = if index < 0 {
                previous
            } else {
                &samples[index as usize * channels..][..channels]
            };
            let to = &samples[(index + 1) as usize * channels..][..channels];
            output.extend(from.iter().zip(to).map(|(a, b)| a * (1.0 - fraction) + b * fraction));
            position += step;
        }

        self.position = position - frame_count as i64 * scale;
        self.previous = samples[(frame_count - 1) * channels..frame_count * channels].to_vec();
        output
    }
}
