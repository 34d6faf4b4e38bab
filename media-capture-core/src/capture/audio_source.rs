use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::config::AudioCaptureConfig;
use crate::models::devices::AudioDeviceInfo;
use crate::models::diagnostics::AudioDiagnostics;
use crate::models::error::CaptureError;
use crate::models::format::WaveFormat;
use crate::models::frame::{AudioSample, MediaClock};
use crate::models::state::CaptureState;
use crate::processing::cancellation::CancellationToken;
use crate::processing::media_queue::{AudioSampleStream, MediaQueue, PushOutcome, QueueReader};
use crate::processing::pcm16_converter::{converter_for, AudioConverter};
use crate::traits::audio_device::{AudioBufferCallback, AudioCaptureDevice};

/// Callback-driven audio ingestion.
///
/// ```text
/// [AudioCaptureDevice] → callback (copy → convert if needed → AudioSample) → [MediaQueue<AudioSample>]
/// ```
///
/// The queue is unbounded: a growing backlog is preferred over gaps in the
/// audio track.
pub struct AudioSource<D: AudioCaptureDevice> {
    device: D,
    config: AudioCaptureConfig,
    converter: Arc<dyn AudioConverter>,
    source_format: WaveFormat,
    output_format: WaveFormat,
    clock: MediaClock,
    queue: Arc<MediaQueue<AudioSample>>,
    diagnostics: Arc<Mutex<AudioDiagnostics>>,
    state: CaptureState,
}

impl<D: AudioCaptureDevice> AudioSource<D> {
    /// Resolves the conversion for `device`. An output format without a
    /// converter fails here, before anything is started.
    pub fn new(device: D, config: AudioCaptureConfig, clock: MediaClock) -> Result<Self, CaptureError> {
        config.validate()?;
        let converter: Arc<dyn AudioConverter> = Arc::from(converter_for(&config)?);
        let source_format = device.source_format()?;
        let output_format = converter.output_format(&source_format);

        let diagnostics = AudioDiagnostics {
            source_format: source_format.to_string(),
            target_format: output_format.to_string(),
            ..Default::default()
        };

        Ok(Self {
            device,
            config,
            converter,
            source_format,
            output_format,
            clock,
            queue: Arc::new(MediaQueue::unbounded()),
            diagnostics: Arc::new(Mutex::new(diagnostics)),
            state: CaptureState::Uninitialized,
        })
    }

    pub fn device_info(&self) -> AudioDeviceInfo {
        self.device.device_info()
    }

    pub fn source_format(&self) -> WaveFormat {
        self.source_format
    }

    /// Layout of every sample this source enqueues.
    pub fn output_format(&self) -> WaveFormat {
        self.output_format
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn diagnostics(&self) -> AudioDiagnostics {
        self.diagnostics.lock().clone()
    }

    pub fn queue(&self) -> Arc<MediaQueue<AudioSample>> {
        Arc::clone(&self.queue)
    }

    pub fn samples(&self, cancel: &CancellationToken) -> AudioSampleStream {
        QueueReader::new(self.queue(), cancel.clone())
    }

    /// Subscribes to the device. A no-op while already capturing.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state.is_capturing() {
            return Ok(());
        }

        self.queue.reopen();
        let callback = ingest_callback(
            Arc::clone(&self.converter),
            Arc::clone(&self.queue),
            Arc::clone(&self.diagnostics),
            self.clock,
        );
        if let Err(e) = self
            .device
            .start(self.config.share_mode, self.config.buffer_duration(), callback)
        {
            log::error!("Audio capture failed to start: {}", e);
            return Err(e);
        }

        let info = self.device.device_info();
        log::info!(
            "Audio capture started on '{}' ({}): source {}, output {}{}",
            info.name,
            if info.is_loopback() { "loopback" } else { "capture" },
            self.source_format,
            self.output_format,
            if self.converter.is_conversion_needed(&self.source_format) {
                ""
            } else {
                " (no conversion)"
            }
        );
        self.state = CaptureState::Capturing;
        Ok(())
    }

    /// Unsubscribes, waits for any in-flight callback, then marks end of
    /// stream. A no-op unless capturing.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.state.is_capturing() {
            return Ok(());
        }
        let result = self.device.stop();
        self.queue.close();
        self.state = CaptureState::Stopped;

        let diag = self.diagnostics();
        log::info!(
            "Audio capture stopped: {} callbacks, {} samples, {} bytes, {} rejected",
            diag.callbacks,
            diag.samples_enqueued,
            diag.bytes_enqueued,
            diag.buffers_rejected
        );
        result
    }
}

impl<D: AudioCaptureDevice> Drop for AudioSource<D> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn ingest_callback(
    converter: Arc<dyn AudioConverter>,
    queue: Arc<MediaQueue<AudioSample>>,
    diagnostics: Arc<Mutex<AudioDiagnostics>>,
    clock: MediaClock,
) -> AudioBufferCallback {
    Arc::new(move |data: &[u8], format: &WaveFormat| {
        let timestamp = clock.now();
        diagnostics.lock().callbacks += 1;
        if data.is_empty() {
            return;
        }

        let target = converter.output_format(format);
        let converted = if converter.is_conversion_needed(format) {
            converter.convert(data, format)
        } else {
            Ok(data.to_vec())
        };

        let sample = converted.and_then(|bytes| {
            AudioSample::new(
                bytes,
                target.channels,
                target.sample_rate,
                target.bits_per_sample,
                timestamp,
            )
        });

        match sample {
            Ok(sample) => {
                let bytes = sample.data().len() as u64;
                if queue.try_push(sample) == PushOutcome::Queued {
                    let mut diag = diagnostics.lock();
                    diag.samples_enqueued += 1;
                    diag.bytes_enqueued += bytes;
                }
            }
            Err(e) => {
                log::warn!("Dropping audio buffer: {}", e);
                diagnostics.lock().buffers_rejected += 1;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format::AudioFormat;
    use crate::testing::MockAudioDevice;
    use std::time::Duration;

    fn float_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn unsupported_output_fails_before_start() {
        let device = MockAudioDevice::new(WaveFormat::ieee_float(48000, 2));
        let config = AudioCaptureConfig {
            output_format: AudioFormat::Float32,
            ..Default::default()
        };
        let result = AudioSource::new(device, config, MediaClock::new());
        assert!(matches!(result, Err(CaptureError::UnsupportedFormat(_))));
    }

    #[test]
    fn converts_float_buffers_to_pcm16() {
        let device = MockAudioDevice::new(WaveFormat::ieee_float(48000, 2));
        let feed = device.feed();
        let mut source = AudioSource::new(device, AudioCaptureConfig::default(), MediaClock::new()).unwrap();
        assert_eq!(source.output_format(), WaveFormat::pcm16(48000, 2));

        source.start().unwrap();
        assert!(feed.push(&float_bytes(&[0.5, -0.5, 0.25, -0.25])));
        source.stop().unwrap();

        let samples: Vec<_> = source.samples(&CancellationToken::new()).collect();
        assert_eq!(samples.len(), 1);
        let sample = &samples[0];
        assert_eq!(sample.channels(), 2);
        assert_eq!(sample.bits_per_sample(), 16);
        assert_eq!(sample.data().len(), 8);
        assert_eq!(i16::from_le_bytes([sample.data()[0], sample.data()[1]]), 16383);
    }

    #[test]
    fn matching_pcm16_passes_through_unchanged() {
        let device = MockAudioDevice::new(WaveFormat::pcm16(44100, 1));
        let feed = device.feed();
        let mut source = AudioSource::new(device, AudioCaptureConfig::default(), MediaClock::new()).unwrap();

        source.start().unwrap();
        feed.push(&[1, 2, 3, 4]);
        source.stop().unwrap();

        let sample = source.queue().try_pop().unwrap();
        assert_eq!(sample.data(), &[1, 2, 3, 4]);
        assert_eq!(sample.sample_rate(), 44100);
    }

    #[test]
    fn every_sample_holds_whole_frames() {
        let device = MockAudioDevice::new(WaveFormat::ieee_float(48000, 6));
        let feed = device.feed();
        let config = AudioCaptureConfig {
            sample_rate: 44100,
            channels: 2,
            ..Default::default()
        };
        let mut source = AudioSource::new(device, config, MediaClock::new()).unwrap();

        source.start().unwrap();
        for frames in [1usize, 7, 441, 480, 1024] {
            feed.push(&float_bytes(&vec![0.1; frames * 6]));
        }
        // Partial frame: rejected rather than enqueued.
        feed.push(&[0u8; 10]);
        source.stop().unwrap();

        let samples: Vec<_> = source.samples(&CancellationToken::new()).collect();
        assert!(!samples.is_empty());
        for sample in &samples {
            assert_eq!(sample.data().len() % (sample.channels() as usize * 2), 0);
        }
        assert_eq!(source.diagnostics().buffers_rejected, 1);
    }

    #[test]
    fn stop_ends_stream_and_rejects_late_buffers() {
        let device = MockAudioDevice::new(WaveFormat::pcm16(48000, 2));
        let feed = device.feed();
        let mut source = AudioSource::new(device, AudioCaptureConfig::default(), MediaClock::new()).unwrap();

        source.stop().unwrap();
        assert_eq!(source.state(), CaptureState::Uninitialized);

        source.start().unwrap();
        source.start().unwrap();
        feed.push(&[0; 4]);
        source.stop().unwrap();
        assert!(!feed.push(&[0; 4]));

        assert_eq!(source.samples(&CancellationToken::new()).count(), 1);
        assert_eq!(source.state(), CaptureState::Stopped);
    }

    #[test]
    fn generator_device_fills_queue_until_stopped() {
        let device = MockAudioDevice::new(WaveFormat::pcm16(48000, 2)).with_generator(480, Duration::from_millis(10));
        let mut source = AudioSource::new(device, AudioCaptureConfig::default(), MediaClock::new()).unwrap();

        source.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        source.stop().unwrap();

        let diag = source.diagnostics();
        assert!(diag.samples_enqueued >= 3);
        assert_eq!(source.queue().len() as u64, diag.samples_enqueued);
    }
}
