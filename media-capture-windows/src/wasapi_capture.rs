//! WASAPI capture of one audio endpoint.
//!
//! Render endpoints (speakers, headphones) are captured in loopback with
//! `AUDCLNT_STREAMFLAGS_LOOPBACK`, which yields the mix the system plays.
//! Capture endpoints (microphones) are read directly. Buffers are delivered
//! in the endpoint's own mix format; conversion happens downstream.
//!
//! ## Notes
//! - No special permissions are needed for loopback
//! - DRM-protected audio is silenced in loopback
//! - Loopback only works in shared mode

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use windows::core::{w, GUID};
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::{AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW};

use media_capture_core::models::devices::AudioDeviceInfo;
use media_capture_core::models::error::CaptureError;
use media_capture_core::models::format::{AudioDirection, SampleEncoding, ShareMode, WaveFormat};
use media_capture_core::traits::audio_device::{AudioBufferCallback, AudioCaptureDevice};

use crate::com::ComApartment;
use crate::device_enumerator::Endpoints;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Loopback silence shorter than this is ordinary packet jitter.
const IDLE_GAP: Duration = Duration::from_millis(30);

const TAG_PCM: u16 = 0x0001;
const TAG_IEEE_FLOAT: u16 = 0x0003;
const TAG_EXTENSIBLE: u16 = 0xFFFE;
const SUBTYPE_PCM: GUID = GUID::from_u128(0x00000001_0000_0010_8000_00aa00389b71);
const SUBTYPE_IEEE_FLOAT: GUID = GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);

/// One endpoint, probed at construction. COM objects live only on the
/// capture thread, so the handle itself is `Send`.
pub struct WasapiCapture {
    info: AudioDeviceInfo,
    format: WaveFormat,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WasapiCapture {
    /// Loopback capture of the default output device.
    pub fn default_loopback() -> Result<Self, CaptureError> {
        Self::probe(None, AudioDirection::Render)
    }

    /// Direct capture of the default input device.
    pub fn default_input() -> Result<Self, CaptureError> {
        Self::probe(None, AudioDirection::Capture)
    }

    /// Endpoint by id; render endpoints are captured in loopback.
    pub fn with_device(id: &str) -> Result<Self, CaptureError> {
        Self::probe(Some(id), AudioDirection::Render)
    }

    fn probe(id: Option<&str>, direction: AudioDirection) -> Result<Self, CaptureError> {
        let _com = ComApartment::enter()?;
        let endpoints = Endpoints::new()?;
        let device = endpoints.device(id, direction)?;
        let info = endpoints.describe(&device)?;
        let format = mix_format(&device)?;
        Ok(Self {
            info,
            format,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }
}

struct StreamSettings {
    device_id: String,
    loopback: bool,
    share_mode: ShareMode,
    buffer_duration: Duration,
    format: WaveFormat,
}

impl AudioCaptureDevice for WasapiCapture {
    fn device_info(&self) -> AudioDeviceInfo {
        self.info.clone()
    }

    fn source_format(&self) -> Result<WaveFormat, CaptureError> {
        Ok(self.format)
    }

    fn start(
        &mut self,
        share_mode: ShareMode,
        buffer_duration: Duration,
        callback: AudioBufferCallback,
    ) -> Result<(), CaptureError> {
        if self.handle.is_some() {
            return Err(CaptureError::InvalidState("WASAPI capture already running".into()));
        }
        if share_mode == ShareMode::Exclusive && self.info.is_loopback() {
            return Err(CaptureError::ConfigurationFailed(
                "loopback capture supports shared mode only".into(),
            ));
        }

        let settings = StreamSettings {
            device_id: self.info.id.clone(),
            loopback: self.info.is_loopback(),
            share_mode,
            buffer_duration,
            format: self.format,
        };
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let (init_tx, init_rx) = mpsc::sync_channel(1);

        let handle = thread::Builder::new()
            .name("wasapi-capture".into())
            .spawn(move || {
                capture_thread(settings, &running, callback, init_tx);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::Unknown(format!("failed to spawn audio capture thread: {}", e))
            })?;

        let started = init_rx
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::Unknown("audio capture thread exited during startup".into())));
        if let Err(e) = started {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| CaptureError::Unknown("audio capture thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for WasapiCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Reports startup through `init_tx`, then delivers buffers until `running`
/// clears or the stream fails.
fn capture_thread(
    settings: StreamSettings,
    running: &AtomicBool,
    callback: AudioBufferCallback,
    init_tx: mpsc::SyncSender<Result<(), CaptureError>>,
) {
    let opened = ComApartment::enter().and_then(|com| CaptureStream::open(&settings).map(|stream| (com, stream)));
    let (_com, stream) = match opened {
        Ok(parts) => parts,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };
    let _ = init_tx.send(Ok(()));

    let _mmcss = MmcssRegistration::join();
    log::info!(
        "WASAPI {} stream started on {}: {}",
        if settings.loopback { "loopback" } else { "capture" },
        settings.device_id,
        settings.format
    );

    if let Err(e) = stream.pump(running, &callback) {
        log::error!("Audio capture error: {}", e);
    }
}

struct CaptureStream {
    audio_client: IAudioClient,
    capture_client: IAudioCaptureClient,
    format: WaveFormat,
    loopback: bool,
}

impl CaptureStream {
    fn open(settings: &StreamSettings) -> Result<Self, CaptureError> {
        let endpoints = Endpoints::new()?;
        let device = endpoints.device(Some(&settings.device_id), AudioDirection::Render)?;

        unsafe {
            let audio_client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| CaptureError::ConfigurationFailed(format!("Activate failed: {}", e)))?;

            let mix_format_ptr = audio_client
                .GetMixFormat()
                .map_err(|e| CaptureError::ConfigurationFailed(format!("GetMixFormat failed: {}", e)))?;
            let format = wave_format_from(mix_format_ptr);
            if let Ok(format) = &format {
                if *format != settings.format {
                    CoTaskMemFree(Some(mix_format_ptr as *const _));
                    return Err(CaptureError::ConfigurationFailed(format!(
                        "device format changed from {} to {}",
                        settings.format, format
                    )));
                }
            }

            // 100 ns units. Exclusive mode requires periodicity == buffer duration.
            let buffer_hns = (settings.buffer_duration.as_nanos() / 100) as i64;
            let (share_mode, periodicity) = match settings.share_mode {
                ShareMode::Shared => (AUDCLNT_SHAREMODE_SHARED, 0),
                ShareMode::Exclusive => (AUDCLNT_SHAREMODE_EXCLUSIVE, buffer_hns),
            };
            let mut flags = AUDCLNT_STREAMFLAGS_NOPERSIST;
            if settings.loopback {
                flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
            }

            let initialized = audio_client.Initialize(share_mode, flags, buffer_hns, periodicity, mix_format_ptr, None);
            CoTaskMemFree(Some(mix_format_ptr as *const _));
            let format = format?;
            initialized
                .map_err(|e| CaptureError::ConfigurationFailed(format!("IAudioClient::Initialize failed: {}", e)))?;

            let capture_client: IAudioCaptureClient = audio_client
                .GetService()
                .map_err(|e| CaptureError::ConfigurationFailed(format!("GetService failed: {}", e)))?;

            audio_client
                .Start()
                .map_err(|e| CaptureError::Unknown(format!("IAudioClient::Start failed: {}", e)))?;

            Ok(Self {
                audio_client,
                capture_client,
                format,
                loopback: settings.loopback,
            })
        }
    }

    fn pump(&self, running: &AtomicBool, callback: &AudioBufferCallback) -> Result<(), CaptureError> {
        let block_align = self.format.block_align();
        let mut silence = Vec::new();
        let mut gap = IdleGap::new(self.format.sample_rate, Instant::now());

        while running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);

            unsafe {
                let mut packet_length = self
                    .capture_client
                    .GetNextPacketSize()
                    .map_err(|e| CaptureError::Unknown(format!("GetNextPacketSize failed: {}", e)))?;

                while packet_length > 0 {
                    let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                    let mut num_frames: u32 = 0;
                    let mut flags: u32 = 0;

                    self.capture_client
                        .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                        .map_err(|e| CaptureError::Unknown(format!("GetBuffer failed: {}", e)))?;

                    if num_frames > 0 && !buffer_ptr.is_null() {
                        let len = num_frames as usize * block_align;
                        if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                            silence.clear();
                            silence.resize(len, 0u8);
                            callback(&silence, &self.format);
                        } else {
                            callback(std::slice::from_raw_parts(buffer_ptr, len), &self.format);
                        }
                    }

                    self.capture_client
                        .ReleaseBuffer(num_frames)
                        .map_err(|e| CaptureError::Unknown(format!("ReleaseBuffer failed: {}", e)))?;

                    gap.delivered(Instant::now());
                    packet_length = self
                        .capture_client
                        .GetNextPacketSize()
                        .map_err(|e| CaptureError::Unknown(format!("GetNextPacketSize failed: {}", e)))?;
                }
            }

            // An idle render endpoint delivers nothing in loopback; keep the
            // audio timeline continuous.
            if self.loopback {
                let frames = gap.take(Instant::now(), IDLE_GAP);
                if frames > 0 {
                    silence.clear();
                    silence.resize(frames * block_align, 0u8);
                    callback(&silence, &self.format);
                }
            }
        }
        Ok(())
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        let _ = unsafe { self.audio_client.Stop() };
    }
}

/// Time since loopback last delivered a packet, measured in sample frames.
struct IdleGap {
    sample_rate: u32,
    last_delivery: Instant,
}

impl IdleGap {
    fn new(sample_rate: u32, now: Instant) -> Self {
        Self {
            sample_rate,
            last_delivery: now,
        }
    }

    fn delivered(&mut self, now: Instant) {
        self.last_delivery = now;
    }

    /// Frames of silence owed at `now`. Zero while the gap is under
    /// `min_gap`; otherwise the whole gap, which is then considered filled.
    fn take(&mut self, now: Instant, min_gap: Duration) -> usize {
        let elapsed = now.saturating_duration_since(self.last_delivery);
        if elapsed < min_gap {
            return 0;
        }
        self.last_delivery = now;
        (elapsed.as_secs_f64() * self.sample_rate as f64).round() as usize
    }
}

/// Real-time scheduling via MMCSS for the lifetime of the value.
struct MmcssRegistration {
    handle: Option<HANDLE>,
}

impl MmcssRegistration {
    fn join() -> Self {
        let mut task_index: u32 = 0;
        match unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) } {
            Ok(handle) => Self { handle: Some(handle) },
            Err(e) => {
                log::warn!("MMCSS registration failed: {}", e);
                Self { handle: None }
            }
        }
    }
}

impl Drop for MmcssRegistration {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = unsafe { AvRevertMmThreadCharacteristics(handle) };
        }
    }
}

/// Shared-mode mix format of `device`.
pub(crate) fn mix_format(device: &IMMDevice) -> Result<WaveFormat, CaptureError> {
    unsafe {
        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("Activate failed: {}", e)))?;
        let ptr = audio_client
            .GetMixFormat()
            .map_err(|e| CaptureError::ConfigurationFailed(format!("GetMixFormat failed: {}", e)))?;
        let format = wave_format_from(ptr);
        CoTaskMemFree(Some(ptr as *const _));
        format
    }
}

/// Reads a `WAVEFORMATEX`, following `WAVEFORMATEXTENSIBLE` to its
/// sub-format.
///
/// # Safety
/// `ptr` must point to a valid format block as returned by `GetMixFormat`.
unsafe fn wave_format_from(ptr: *const WAVEFORMATEX) -> Result<WaveFormat, CaptureError> {
    let format = ptr.read_unaligned();
    let tag = format.wFormatTag;
    let extra = format.cbSize;
    let sub_format = if tag == TAG_EXTENSIBLE && extra >= 22 {
        let extensible = (ptr as *const WAVEFORMATEXTENSIBLE).read_unaligned();
        Some(extensible.SubFormat)
    } else {
        None
    };
    Ok(WaveFormat {
        encoding: classify(tag, sub_format)?,
        sample_rate: format.nSamplesPerSec,
        channels: format.nChannels,
        bits_per_sample: format.wBitsPerSample,
    })
}

fn classify(tag: u16, sub_format: Option<GUID>) -> Result<SampleEncoding, CaptureError> {
    match (tag, sub_format) {
        (TAG_PCM, _) => Ok(SampleEncoding::Pcm),
        (TAG_IEEE_FLOAT, _) => Ok(SampleEncoding::IeeeFloat),
        (TAG_EXTENSIBLE, Some(sub)) if sub == SUBTYPE_PCM => Ok(SampleEncoding::Pcm),
        (TAG_EXTENSIBLE, Some(sub)) if sub == SUBTYPE_IEEE_FLOAT => Ok(SampleEncoding::IeeeFloat),
        (TAG_EXTENSIBLE, Some(sub)) => Err(CaptureError::UnsupportedFormat(format!("sub-format {:?}", sub))),
        _ => Err(CaptureError::UnsupportedFormat(format!("wave format tag {:#06x}", tag))),
    }
}
