//! Scripted stand-ins for display and audio hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::devices::AudioDeviceInfo;
use crate::models::error::CaptureError;
use crate::models::format::{AudioDirection, ShareMode, WaveFormat};
use crate::models::frame::{MediaTimestamp, VideoFrame};
use crate::traits::audio_device::{AudioBufferCallback, AudioCaptureDevice};
use crate::traits::display_device::{AcquireOutcome, DisplayDevice, DisplayDeviceFactory, FrameGeneration};

#[derive(Default)]
struct ProbeCounters {
    opens: AtomicU64,
    acquires: AtomicU64,
    reinitializations: AtomicU64,
    disposals: AtomicU64,
}

/// Read-only view of what the mock display saw, usable after the factory
/// has been moved into a source.
#[derive(Clone, Default)]
pub struct DisplayProbe {
    counters: Arc<ProbeCounters>,
}

impl DisplayProbe {
    pub fn opens(&self) -> u64 {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> u64 {
        self.counters.acquires.load(Ordering::SeqCst)
    }

    pub fn reinitializations(&self) -> u64 {
        self.counters.reinitializations.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> u64 {
        self.counters.disposals.load(Ordering::SeqCst)
    }
}

/// Produces [`MockDisplayDevice`]s with a deterministic BGRA pattern.
pub struct MockDisplayFactory {
    width: u32,
    height: u32,
    frame_interval: Duration,
    access_lost_on: Option<u64>,
    fail_open: bool,
    probe: DisplayProbe,
}

impl MockDisplayFactory {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::ZERO,
            access_lost_on: None,
            fail_open: false,
            probe: DisplayProbe::default(),
        }
    }

    /// New frames appear no more often than `interval`; acquires in between
    /// time out.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// The `n`th acquire (1-based, counted across reinitializations) reports
    /// access lost.
    pub fn with_access_lost_on(mut self, n: u64) -> Self {
        self.access_lost_on = Some(n);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn probe(&self) -> DisplayProbe {
        self.probe.clone()
    }
}

impl DisplayDeviceFactory for MockDisplayFactory {
    type Device = MockDisplayDevice;

    fn output_size(&self) -> Result<(u32, u32), CaptureError> {
        Ok((self.width, self.height))
    }

    fn open(&self) -> Result<MockDisplayDevice, CaptureError> {
        if self.fail_open {
            return Err(CaptureError::DeviceInit("output already duplicated".into()));
        }
        self.probe.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockDisplayDevice {
            width: self.width,
            height: self.height,
            frame_interval: self.frame_interval,
            access_lost_on: self.access_lost_on,
            probe: self.probe.clone(),
            last_delivery: None,
            sequence: 0,
            generation: FrameGeneration::new(),
        })
    }
}

#[derive(Debug)]
pub struct MockFrame {
    sequence: u64,
    generation: u64,
}

pub struct MockDisplayDevice {
    width: u32,
    height: u32,
    frame_interval: Duration,
    access_lost_on: Option<u64>,
    probe: DisplayProbe,
    last_delivery: Option<Instant>,
    sequence: u64,
    generation: FrameGeneration,
}

/// Pixel `(x, y)` of frame `sequence` is `[x, y, sequence, 255]` (mod 256).
pub fn pattern(width: u32, height: u32, sequence: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[x as u8, y as u8, sequence as u8, 255]);
        }
    }
    data
}

impl DisplayDevice for MockDisplayDevice {
    type Frame = MockFrame;

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn try_acquire_frame(&mut self, _timeout: Duration) -> Result<AcquireOutcome<MockFrame>, CaptureError> {
        self.generation.ensure_live("mock display")?;
        let n = self.probe.counters.acquires.fetch_add(1, Ordering::SeqCst) + 1;
        if self.access_lost_on == Some(n) {
            return Ok(AcquireOutcome::AccessLost);
        }
        let due = self
            .last_delivery
            .map_or(true, |at| at.elapsed() >= self.frame_interval);
        if !due {
            return Ok(AcquireOutcome::Timeout);
        }
        self.sequence += 1;
        self.last_delivery = Some(Instant::now());
        Ok(AcquireOutcome::Frame(MockFrame {
            sequence: self.sequence,
            generation: self.generation.current(),
        }))
    }

    fn copy_to_cpu_buffer(&mut self, frame: &MockFrame, timestamp: MediaTimestamp) -> Result<VideoFrame, CaptureError> {
        self.generation.check_frame(frame.generation)?;
        VideoFrame::new(
            self.width,
            self.height,
            pattern(self.width, self.height, frame.sequence),
            timestamp,
        )
    }

    fn release(&mut self, frame: MockFrame) -> Result<(), CaptureError> {
        self.generation.check_frame(frame.generation)
    }

    fn reinitialize(&mut self) -> Result<(), CaptureError> {
        self.generation.advance()?;
        self.probe.counters.reinitializations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dispose(&mut self) {
        if self.generation.dispose() {
            self.probe.counters.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Handle for pushing buffers into a started [`MockAudioDevice`].
#[derive(Clone)]
pub struct AudioFeed {
    callback: Arc<Mutex<Option<AudioBufferCallback>>>,
    format: WaveFormat,
}

impl AudioFeed {
    /// Delivers `data` like an OS callback would. Returns `false` when the
    /// device is not started.
    pub fn push(&self, data: &[u8]) -> bool {
        // Held for the whole call so `stop` waits for it to finish.
        let guard = self.callback.lock();
        match guard.as_ref() {
            Some(callback) => {
                callback(data, &self.format);
                true
            }
            None => false,
        }
    }
}

/// Push-driven audio endpoint. Buffers arrive through an [`AudioFeed`] or,
/// with a generator configured, from a background thread emitting silence.
pub struct MockAudioDevice {
    info: AudioDeviceInfo,
    feed: AudioFeed,
    generator: Option<(usize, Duration)>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockAudioDevice {
    pub fn new(format: WaveFormat) -> Self {
        Self {
            info: AudioDeviceInfo {
                id: "mock-render".into(),
                name: "Mock Speakers".into(),
                direction: AudioDirection::Render,
                channels: format.channels,
                sample_rate: format.sample_rate,
                is_default: true,
            },
            feed: AudioFeed {
                callback: Arc::new(Mutex::new(None)),
                format,
            },
            generator: None,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Emits `frames` silent sample frames every `interval` while started.
    pub fn with_generator(mut self, frames: usize, interval: Duration) -> Self {
        self.generator = Some((frames, interval));
        self
    }

    pub fn feed(&self) -> AudioFeed {
        self.feed.clone()
    }
}

impl AudioCaptureDevice for MockAudioDevice {
    fn device_info(&self) -> AudioDeviceInfo {
        self.info.clone()
    }

    fn source_format(&self) -> Result<WaveFormat, CaptureError> {
        Ok(self.feed.format)
    }

    fn start(
        &mut self,
        _share_mode: ShareMode,
        _buffer_duration: Duration,
        callback: AudioBufferCallback,
    ) -> Result<(), CaptureError> {
        *self.feed.callback.lock() = Some(callback);
        self.running.store(true, Ordering::SeqCst);

        if let Some((frames, interval)) = self.generator {
            let feed = self.feed.clone();
            let running = Arc::clone(&self.running);
            let silence = vec![0u8; frames * feed.format.block_align()];
            self.handle = Some(thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    feed.push(&silence);
                    thread::sleep(interval);
                }
            }));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        *self.feed.callback.lock() = None;
        Ok(())
    }
}

/// Fresh directory under the system temp dir.
pub fn scratch_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("media-capture-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Writes an executable shell script standing in for the encoder.
#[cfg(unix)]
pub fn fake_encoder(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-encoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write fake encoder");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod fake encoder");
    path
}

/// Encoder stand-in that reads every `-i` input concurrently to EOF and
/// writes one byte count per input, in argument order, to the last argument.
#[cfg(unix)]
pub const COUNTING_ENCODER: &str = r#"
out=""
inputs=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then inputs="$inputs $arg"; fi
  prev="$arg"
  out="$arg"
done
i=0
for f in $inputs; do
  wc -c < "$f" > "$out.part$i" &
  i=$((i+1))
done
wait
cat "$out".part* > "$out"
rm -f "$out".part*
echo "counted $i inputs" >&2
"#;

/// Reads the byte counts written by [`COUNTING_ENCODER`].
pub fn read_counts(path: &std::path::Path) -> Vec<u64> {
    std::fs::read_to_string(path)
        .expect("read encoder output")
        .lines()
        .map(|line| line.trim().parse().expect("byte count"))
        .collect()
}
