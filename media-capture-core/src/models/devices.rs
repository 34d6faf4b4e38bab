use serde::{Deserialize, Serialize};

use super::format::AudioDirection;

/// Display rotation reported by the OS for an output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
    Unspecified,
}

impl Rotation {
    /// Whether the desktop is turned a quarter turn against the display mode.
    pub fn is_quarter_turn(&self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }
}

/// One monitor output as seen at enumeration time.
///
/// Never cached: a descriptor goes stale as soon as the display configuration
/// changes, which surfaces as `AccessLost` on the capture side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorDescriptor {
    /// Position in the flattened adapter/output enumeration.
    pub global_index: usize,
    pub adapter_id: u32,
    pub output_id: u32,
    /// OS device name, e.g. `\\.\DISPLAY1`.
    pub device_name: String,
    /// Desktop-space size, already rotated.
    pub width: u32,
    pub height: u32,
    pub attached: bool,
    pub rotation: Rotation,
}

impl MonitorDescriptor {
    /// Size of the duplicated desktop image.
    ///
    /// Duplication hands out the surface in display-mode orientation, so a
    /// portrait monitor (90 or 270 degrees) is captured with width and height
    /// swapped relative to the desktop. The recorded stream is not rotated back.
    pub fn capture_size(&self) -> (u32, u32) {
        if self.rotation.is_quarter_turn() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// An audio endpoint available for capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub direction: AudioDirection,
    /// Channel count of the endpoint's mix format.
    pub channels: u16,
    /// Sample rate of the endpoint's mix format.
    pub sample_rate: u32,
    pub is_default: bool,
}

impl AudioDeviceInfo {
    /// Render endpoints are recorded through loopback.
    pub fn is_loopback(&self) -> bool {
        self.direction == AudioDirection::Render
    }
}
