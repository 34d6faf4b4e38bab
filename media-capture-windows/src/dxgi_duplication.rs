//! DXGI desktop duplication of a single monitor output.
//!
//! Each acquired desktop texture is copied into a CPU-readable staging
//! texture and read back row by row, dropping the driver's row padding.
//! Frames keep the display-mode orientation: a rotated monitor is recorded
//! the way its panel scans out, not upright.

use std::time::Duration;

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_UNKNOWN;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use media_capture_core::models::devices::MonitorDescriptor;
use media_capture_core::models::error::CaptureError;
use media_capture_core::models::frame::{MediaTimestamp, VideoFrame};
use media_capture_core::traits::display_device::{AcquireOutcome, DisplayDevice, DisplayDeviceFactory, FrameGeneration};

use crate::monitor_enumerator::enumerate_monitors;

/// Opens duplications of one output. Cheap to hold; no GPU state until
/// [`open`](DisplayDeviceFactory::open) runs on the capture thread.
#[derive(Debug, Clone)]
pub struct DxgiOutputFactory {
    monitor: MonitorDescriptor,
}

impl DxgiOutputFactory {
    pub fn new(monitor: MonitorDescriptor) -> Self {
        Self { monitor }
    }

    /// Looks up the monitor by its global index across all adapters.
    pub fn for_index(global_index: usize) -> Result<Self, CaptureError> {
        let monitors = enumerate_monitors()?;
        let count = monitors.len();
        monitors
            .into_iter()
            .find(|m| m.global_index == global_index)
            .map(Self::new)
            .ok_or_else(|| {
                CaptureError::DeviceInit(format!(
                    "monitor index {} out of range ({} monitors found)",
                    global_index, count
                ))
            })
    }

    pub fn monitor(&self) -> &MonitorDescriptor {
        &self.monitor
    }
}

impl DisplayDeviceFactory for DxgiOutputFactory {
    type Device = DxgiDisplayDevice;

    fn output_size(&self) -> Result<(u32, u32), CaptureError> {
        Ok(self.monitor.capture_size())
    }

    fn open(&self) -> Result<DxgiDisplayDevice, CaptureError> {
        DxgiDisplayDevice::open(&self.monitor)
    }
}

/// GPU objects for one duplication. Field order is release order.
struct DuplicationResources {
    staging: ID3D11Texture2D,
    duplication: IDXGIOutputDuplication,
    context: ID3D11DeviceContext,
    #[allow(dead_code)]
    device: ID3D11Device,
}

/// Handle to an acquired desktop frame. Valid until released or until the
/// device is reinitialized.
pub struct DxgiFrame {
    texture: ID3D11Texture2D,
    generation: u64,
}

pub struct DxgiDisplayDevice {
    adapter_id: u32,
    output_id: u32,
    width: u32,
    height: u32,
    resources: Option<DuplicationResources>,
    generation: FrameGeneration,
}

impl DxgiDisplayDevice {
    pub fn open(monitor: &MonitorDescriptor) -> Result<Self, CaptureError> {
        let (width, height) = monitor.capture_size();
        let resources = open_resources(monitor.adapter_id, monitor.output_id, width, height)?;
        log::info!(
            "Duplicating {} (adapter {}, output {}) at {}x{}",
            monitor.device_name,
            monitor.adapter_id,
            monitor.output_id,
            width,
            height
        );
        Ok(Self {
            adapter_id: monitor.adapter_id,
            output_id: monitor.output_id,
            width,
            height,
            resources: Some(resources),
            generation: FrameGeneration::new(),
        })
    }

    fn resources(&self) -> Result<&DuplicationResources, CaptureError> {
        self.generation.ensure_live("display duplication")?;
        self.resources
            .as_ref()
            .ok_or_else(|| CaptureError::DeviceInit("duplication not initialized".into()))
    }

    fn check_frame(&self, frame: &DxgiFrame) -> Result<&DuplicationResources, CaptureError> {
        self.generation.check_frame(frame.generation)?;
        self.resources()
    }
}

impl DisplayDevice for DxgiDisplayDevice {
    type Frame = DxgiFrame;

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn try_acquire_frame(&mut self, timeout: Duration) -> Result<AcquireOutcome<DxgiFrame>, CaptureError> {
        let resources = self.resources()?;
        let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;

        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired = unsafe { resources.duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) };
        match acquired {
            Ok(()) => {}
            Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(AcquireOutcome::Timeout),
            Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => return Ok(AcquireOutcome::AccessLost),
            Err(e) => return Err(CaptureError::Unknown(format!("AcquireNextFrame failed: {}", e))),
        }

        let texture = match resource.map(|r| r.cast::<ID3D11Texture2D>()) {
            Some(Ok(texture)) => texture,
            other => {
                let _ = unsafe { resources.duplication.ReleaseFrame() };
                return match other {
                    Some(Err(e)) => Err(CaptureError::Unknown(format!("desktop resource is not a texture: {}", e))),
                    _ => Ok(AcquireOutcome::Timeout),
                };
            }
        };

        Ok(AcquireOutcome::Frame(DxgiFrame {
            texture,
            generation: self.generation.current(),
        }))
    }

    fn copy_to_cpu_buffer(&mut self, frame: &DxgiFrame, timestamp: MediaTimestamp) -> Result<VideoFrame, CaptureError> {
        let resources = self.check_frame(frame)?;

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { frame.texture.GetDesc(&mut desc) };
        if desc.Width != self.width || desc.Height != self.height {
            return Err(CaptureError::InvalidBuffer(format!(
                "desktop surface is {}x{}, expected {}x{}",
                desc.Width, desc.Height, self.width, self.height
            )));
        }

        let data = unsafe {
            resources.context.CopyResource(&resources.staging, &frame.texture);

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            resources
                .context
                .Map(&resources.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(|e| CaptureError::Unknown(format!("Map staging texture failed: {}", e)))?;

            let row_pitch = mapped.RowPitch as usize;
            let row_bytes = self.width as usize * 4;
            let len = row_pitch * (self.height as usize - 1) + row_bytes;
            let mapped_bytes = std::slice::from_raw_parts(mapped.pData as *const u8, len);
            let data = pack_rows(mapped_bytes, row_pitch, row_bytes, self.height as usize);

            resources.context.Unmap(&resources.staging, 0);
            data
        };

        VideoFrame::new(self.width, self.height, data, timestamp)
    }

    fn release(&mut self, frame: DxgiFrame) -> Result<(), CaptureError> {
        let resources = self.check_frame(&frame)?;
        drop(frame);
        match unsafe { resources.duplication.ReleaseFrame() } {
            Ok(()) => Ok(()),
            Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => Err(CaptureError::AccessLost),
            Err(e) => Err(CaptureError::Unknown(format!("ReleaseFrame failed: {}", e))),
        }
    }

    fn reinitialize(&mut self) -> Result<(), CaptureError> {
        // Outstanding frames belong to the old duplication.
        self.generation.advance()?;
        self.resources = None;
        self.resources = Some(open_resources(self.adapter_id, self.output_id, self.width, self.height)?);
        log::info!(
            "Duplication of adapter {} output {} reinitialized",
            self.adapter_id,
            self.output_id
        );
        Ok(())
    }

    fn dispose(&mut self) {
        if !self.generation.dispose() {
            return;
        }
        self.resources = None;
        log::debug!("Duplication of adapter {} output {} disposed", self.adapter_id, self.output_id);
    }
}

impl Drop for DxgiDisplayDevice {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn open_resources(adapter_id: u32, output_id: u32, width: u32, height: u32) -> Result<DuplicationResources, CaptureError> {
    unsafe {
        let factory: IDXGIFactory1 = CreateDXGIFactory1()
            .map_err(|e| CaptureError::DeviceInit(format!("CreateDXGIFactory1 failed: {}", e)))?;
        let adapter = factory
            .EnumAdapters1(adapter_id)
            .map_err(|e| CaptureError::DeviceInit(format!("adapter {} not found: {}", adapter_id, e)))?;
        let output = adapter.EnumOutputs(output_id).map_err(|e| {
            CaptureError::DeviceInit(format!("output {} not found on adapter {}: {}", output_id, adapter_id, e))
        })?;

        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        D3D11CreateDevice(
            &adapter,
            D3D_DRIVER_TYPE_UNKNOWN,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            None,
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
        .map_err(|e| CaptureError::DeviceInit(format!("D3D11CreateDevice failed: {}", e)))?;
        let device = device.ok_or_else(|| CaptureError::DeviceInit("D3D11CreateDevice returned no device".into()))?;
        let context =
            context.ok_or_else(|| CaptureError::DeviceInit("D3D11CreateDevice returned no context".into()))?;

        let output1: IDXGIOutput1 = output
            .cast()
            .map_err(|e| CaptureError::DeviceInit(format!("IDXGIOutput1 unavailable: {}", e)))?;
        let duplication = output1
            .DuplicateOutput(&device)
            .map_err(|e| CaptureError::DeviceInit(format!("DuplicateOutput failed: {}", e)))?;

        let staging = create_staging_texture(&device, width, height)?;

        Ok(DuplicationResources {
            staging,
            duplication,
            context,
            device,
        })
    }
}

/// CPU-readable BGRA texture the desktop image is copied into.
fn create_staging_texture(device: &ID3D11Device, width: u32, height: u32) -> Result<ID3D11Texture2D, CaptureError> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Usage: D3D11_USAGE_STAGING,
        BindFlags: 0,
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: 0,
    };
    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .map_err(|e| CaptureError::DeviceInit(format!("CreateTexture2D (staging) failed: {}", e)))?;
    texture.ok_or_else(|| CaptureError::DeviceInit("CreateTexture2D returned no texture".into()))
}

/// Copies `rows` rows of `row_bytes` each out of a buffer whose rows start
/// every `row_pitch` bytes.
fn pack_rows(src: &[u8], row_pitch: usize, row_bytes: usize, rows: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(row_bytes * rows);
    for row in 0..rows {
        let start = row * row_pitch;
        data.extend_from_slice(&src[start..start + row_bytes]);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_rows_drops_padding() {
        // 2 rows of 3 bytes, pitch 5.
        let src = [1, 2, 3, 0, 0, 4, 5, 6];
        assert_eq!(pack_rows(&src, 5, 3, 2), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn pack_rows_without_padding_is_a_copy() {
        let src: Vec<u8> = (0..16).collect();
        assert_eq!(pack_rows(&src, 8, 8, 2), src);
    }
}
