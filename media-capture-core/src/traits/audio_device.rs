use std::sync::Arc;
use std::time::Duration;

use crate::models::devices::AudioDeviceInfo;
use crate::models::error::CaptureError;
use crate::models::format::{ShareMode, WaveFormat};

/// Callback invoked when the OS delivers an audio buffer.
///
/// Parameters:
/// - `data`: interleaved samples exactly as the device produced them.
/// - `format`: layout of `data`.
///
/// Runs on the device's capture thread; keep the work bounded.
pub type AudioBufferCallback = Arc<dyn Fn(&[u8], &WaveFormat) + Send + Sync + 'static>;

/// Push-driven audio endpoint.
///
/// Implemented by:
/// - `WasapiCapture` (Windows, capture or loopback)
pub trait AudioCaptureDevice: Send {
    fn device_info(&self) -> AudioDeviceInfo;

    /// Format buffers will be delivered in.
    fn source_format(&self) -> Result<WaveFormat, CaptureError>;

    /// Starts delivery to `callback`.
    fn start(
        &mut self,
        share_mode: ShareMode,
        buffer_duration: Duration,
        callback: AudioBufferCallback,
    ) -> Result<(), CaptureError>;

    /// Stops delivery. Returns only after any in-flight callback has finished.
    fn stop(&mut self) -> Result<(), CaptureError>;
}
