//! Monitor enumeration across all DXGI adapters.

use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use media_capture_core::models::devices::{MonitorDescriptor, Rotation};
use media_capture_core::models::error::CaptureError;

/// Every output of every adapter, numbered in enumeration order.
///
/// The global index is stable for a given hardware setup and is what the
/// recorder configuration refers to.
pub fn enumerate_monitors() -> Result<Vec<MonitorDescriptor>, CaptureError> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .map_err(|e| CaptureError::DeviceInit(format!("CreateDXGIFactory1 failed: {}", e)))?;

    let mut monitors = Vec::new();
    for adapter_id in 0u32.. {
        // DXGI_ERROR_NOT_FOUND marks the end of the list.
        let adapter = match unsafe { factory.EnumAdapters1(adapter_id) } {
            Ok(adapter) => adapter,
            Err(_) => break,
        };

        for output_id in 0u32.. {
            let output = match unsafe { adapter.EnumOutputs(output_id) } {
                Ok(output) => output,
                Err(_) => break,
            };
            let desc = match unsafe { output.GetDesc() } {
                Ok(desc) => desc,
                Err(e) => {
                    log::warn!("Skipping output {} on adapter {}: {}", output_id, adapter_id, e);
                    continue;
                }
            };

            let bounds = desc.DesktopCoordinates;
            monitors.push(MonitorDescriptor {
                global_index: monitors.len(),
                adapter_id,
                output_id,
                device_name: wide_to_string(&desc.DeviceName),
                width: (bounds.right - bounds.left).max(0) as u32,
                height: (bounds.bottom - bounds.top).max(0) as u32,
                attached: desc.AttachedToDesktop.as_bool(),
                rotation: rotation_from(desc.Rotation),
            });
        }
    }

    log::debug!("Found {} monitor(s)", monitors.len());
    Ok(monitors)
}

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

fn rotation_from(rotation: DXGI_MODE_ROTATION) -> Rotation {
    match rotation {
        DXGI_MODE_ROTATION_IDENTITY => Rotation::Identity,
        DXGI_MODE_ROTATION_ROTATE90 => Rotation::Rotate90,
        DXGI_MODE_ROTATION_ROTATE180 => Rotation::Rotate180,
        DXGI_MODE_ROTATION_ROTATE270 => Rotation::Rotate270,
        _ => Rotation::Unspecified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_stops_at_nul() {
        let mut wide = [0u16; 32];
        for (i, c) in r"\\.\DISPLAY1".encode_utf16().enumerate() {
            wide[i] = c;
        }
        assert_eq!(wide_to_string(&wide), r"\\.\DISPLAY1");
    }

    #[test]
    fn rotation_mapping() {
        assert_eq!(rotation_from(DXGI_MODE_ROTATION_ROTATE90), Rotation::Rotate90);
        assert_eq!(rotation_from(DXGI_MODE_ROTATION_UNSPECIFIED), Rotation::Unspecified);
    }
}
