//! Monitor and audio endpoint discovery.
//!
//! Monitors come from DXGI; audio endpoints from the MMDevice API, each
//! described with its friendly name and shared-mode mix format.

use windows::core::{Interface, HSTRING};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use media_capture_core::models::devices::{AudioDeviceInfo, MonitorDescriptor};
use media_capture_core::models::error::CaptureError;
use media_capture_core::models::format::AudioDirection;
use media_capture_core::traits::enumerator::DeviceEnumerator;

use crate::com::ComApartment;
use crate::monitor_enumerator::enumerate_monitors;
use crate::wasapi_capture::mix_format;

/// System device enumerator. Holds no COM state, so it can be shared freely;
/// every query joins the COM apartment for its own duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsDeviceEnumerator;

impl WindowsDeviceEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceEnumerator for WindowsDeviceEnumerator {
    fn monitors(&self) -> Result<Vec<MonitorDescriptor>, CaptureError> {
        enumerate_monitors()
    }

    fn audio_devices(&self, direction: AudioDirection) -> Result<Vec<AudioDeviceInfo>, CaptureError> {
        let _com = ComApartment::enter()?;
        Endpoints::new()?.list(direction)
    }

    fn default_audio_device(&self, direction: AudioDirection) -> Result<AudioDeviceInfo, CaptureError> {
        let _com = ComApartment::enter()?;
        let endpoints = Endpoints::new()?;
        let device = endpoints.device(None, direction)?;
        endpoints.describe(&device)
    }
}

/// `IMMDeviceEnumerator` wrapper. Must stay on the thread that created it.
pub(crate) struct Endpoints {
    enumerator: IMMDeviceEnumerator,
}

impl Endpoints {
    /// Requires COM to be initialized on the calling thread.
    pub(crate) fn new() -> Result<Self, CaptureError> {
        let enumerator: IMMDeviceEnumerator = unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
            .map_err(|e| CaptureError::Unknown(format!("failed to create enumerator: {}", e)))?;
        Ok(Self { enumerator })
    }

    /// The endpoint with `id`, or the default endpoint for `direction`.
    pub(crate) fn device(&self, id: Option<&str>, direction: AudioDirection) -> Result<IMMDevice, CaptureError> {
        unsafe {
            match id {
                Some(id) => self
                    .enumerator
                    .GetDevice(&HSTRING::from(id))
                    .map_err(|_| CaptureError::DeviceNotAvailable),
                None => self
                    .enumerator
                    .GetDefaultAudioEndpoint(data_flow(direction), eConsole)
                    .map_err(|_| CaptureError::DeviceNotAvailable),
            }
        }
    }

    pub(crate) fn list(&self, direction: AudioDirection) -> Result<Vec<AudioDeviceInfo>, CaptureError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow(direction), DEVICE_STATE_ACTIVE)
                .map_err(|e| CaptureError::Unknown(format!("EnumAudioEndpoints failed: {}", e)))?;
            let count = collection
                .GetCount()
                .map_err(|e| CaptureError::Unknown(format!("GetCount failed: {}", e)))?;

            let default_id = self.default_id(direction);
            let mut devices = Vec::new();
            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(device) => device,
                    Err(_) => continue,
                };
                match self.describe_with_default(&device, default_id.as_deref()) {
                    Ok(info) => devices.push(info),
                    Err(e) => log::warn!("Skipping {} endpoint {}: {}", direction, i, e),
                }
            }
            Ok(devices)
        }
    }

    pub(crate) fn describe(&self, device: &IMMDevice) -> Result<AudioDeviceInfo, CaptureError> {
        let direction = direction_of(device)?;
        let default_id = self.default_id(direction);
        self.describe_with_default(device, default_id.as_deref())
    }

    fn describe_with_default(&self, device: &IMMDevice, default_id: Option<&str>) -> Result<AudioDeviceInfo, CaptureError> {
        let id = device_id(device)?;
        let direction = direction_of(device)?;
        let format = mix_format(device)?;
        let name = friendly_name(device).unwrap_or_else(|| id.clone());
        Ok(AudioDeviceInfo {
            is_default: default_id == Some(id.as_str()),
            id,
            name,
            direction,
            channels: format.channels,
            sample_rate: format.sample_rate,
        })
    }

    fn default_id(&self, direction: AudioDirection) -> Option<String> {
        unsafe { self.enumerator.GetDefaultAudioEndpoint(data_flow(direction), eConsole) }
            .ok()
            .and_then(|device| device_id(&device).ok())
    }
}

fn data_flow(direction: AudioDirection) -> EDataFlow {
    match direction {
        AudioDirection::Render => eRender,
        AudioDirection::Capture => eCapture,
    }
}

fn direction_of(device: &IMMDevice) -> Result<AudioDirection, CaptureError> {
    let endpoint: IMMEndpoint = device
        .cast()
        .map_err(|e| CaptureError::Unknown(format!("IMMEndpoint unavailable: {}", e)))?;
    let flow = unsafe { endpoint.GetDataFlow() }
        .map_err(|e| CaptureError::Unknown(format!("GetDataFlow failed: {}", e)))?;
    Ok(if flow == eCapture {
        AudioDirection::Capture
    } else {
        AudioDirection::Render
    })
}

fn device_id(device: &IMMDevice) -> Result<String, CaptureError> {
    unsafe {
        let id = device
            .GetId()
            .map_err(|e| CaptureError::Unknown(format!("GetId failed: {}", e)))?;
        let text = id.to_string();
        CoTaskMemFree(Some(id.0 as *const _));
        text.map_err(|e| CaptureError::Unknown(format!("endpoint id is not valid UTF-16: {}", e)))
    }
}

/// PKEY_Device_FriendlyName, e.g. "Speakers (Realtek High Definition Audio)".
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = value.to_string();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}
