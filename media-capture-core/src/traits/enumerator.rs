use crate::models::devices::{AudioDeviceInfo, MonitorDescriptor};
use crate::models::error::CaptureError;
use crate::models::format::AudioDirection;

/// Enumeration service for displays and audio endpoints.
///
/// Results are queried fresh on every call. Callers hold an instance rather
/// than reaching for process-wide state.
pub trait DeviceEnumerator: Send + Sync {
    fn monitors(&self) -> Result<Vec<MonitorDescriptor>, CaptureError>;

    fn audio_devices(&self, direction: AudioDirection) -> Result<Vec<AudioDeviceInfo>, CaptureError>;

    fn default_audio_device(&self, direction: AudioDirection) -> Result<AudioDeviceInfo, CaptureError>;

    fn monitor_by_index(&self, global_index: usize) -> Result<MonitorDescriptor, CaptureError> {
        self.monitors()?
            .into_iter()
            .find(|m| m.global_index == global_index)
            .ok_or_else(|| CaptureError::DeviceInit(format!("no monitor with index {}", global_index)))
    }

    /// Case-insensitive match on the OS device name.
    fn monitor_by_name(&self, device_name: &str) -> Result<MonitorDescriptor, CaptureError> {
        self.monitors()?
            .into_iter()
            .find(|m| m.device_name.eq_ignore_ascii_case(device_name))
            .ok_or_else(|| CaptureError::DeviceInit(format!("no monitor named {}", device_name)))
    }

    fn monitor_by_output(&self, adapter_id: u32, output_id: u32) -> Result<MonitorDescriptor, CaptureError> {
        self.monitors()?
            .into_iter()
            .find(|m| m.adapter_id == adapter_id && m.output_id == output_id)
            .ok_or_else(|| {
                CaptureError::DeviceInit(format!("no output {} on adapter {}", output_id, adapter_id))
            })
    }

    /// Searches both directions.
    fn audio_device_by_id(&self, id: &str) -> Result<AudioDeviceInfo, CaptureError> {
        for direction in [AudioDirection::Render, AudioDirection::Capture] {
            if let Some(device) = self.audio_devices(direction)?.into_iter().find(|d| d.id == id) {
                return Ok(device);
            }
        }
        Err(CaptureError::DeviceNotAvailable)
    }
}
