use std::time::Duration;

use crate::models::error::CaptureError;
use crate::models::frame::{MediaTimestamp, VideoFrame};

/// Result of asking the compositor for a new desktop image.
#[derive(Debug)]
pub enum AcquireOutcome<F> {
    /// A new frame is held and must be handed back through `release`.
    Frame(F),
    /// Nothing changed on screen within the timeout.
    Timeout,
    /// The duplication was invalidated (mode change, exclusive fullscreen).
    AccessLost,
}

/// One monitor output bound for duplication.
///
/// Implementations own GPU resources and are used exclusively by the thread
/// that opened them, so the trait does not require `Send`.
///
/// Implemented by:
/// - `DxgiDisplayDevice` (Windows)
pub trait DisplayDevice {
    /// Opaque handle to an acquired GPU frame.
    type Frame;

    /// Output size in pixels.
    fn size(&self) -> (u32, u32);

    /// Waits up to `timeout` for the next desktop image.
    fn try_acquire_frame(&mut self, timeout: Duration) -> Result<AcquireOutcome<Self::Frame>, CaptureError>;

    /// Reads an acquired frame back into tightly packed CPU memory.
    fn copy_to_cpu_buffer(&mut self, frame: &Self::Frame, timestamp: MediaTimestamp) -> Result<VideoFrame, CaptureError>;

    /// Hands the frame back to the OS. Fails with `UseAfterDispose` for frames
    /// from an earlier duplication or a disposed device.
    fn release(&mut self, frame: Self::Frame) -> Result<(), CaptureError>;

    /// Tears down and recreates the duplication after `AccessLost`.
    fn reinitialize(&mut self) -> Result<(), CaptureError>;

    /// Releases every GPU resource. Later calls other than `dispose` fail
    /// with `UseAfterDispose`.
    fn dispose(&mut self);

    /// Acquire, read back and release in one step. The frame is released on
    /// every path, including a failed copy.
    fn capture_frame(
        &mut self,
        timeout: Duration,
        timestamp: MediaTimestamp,
    ) -> Result<AcquireOutcome<VideoFrame>, CaptureError> {
        match self.try_acquire_frame(timeout)? {
            AcquireOutcome::Frame(handle) => {
                let copied = self.copy_to_cpu_buffer(&handle, timestamp);
                let released = self.release(handle);
                let frame = copied?;
                released?;
                Ok(AcquireOutcome::Frame(frame))
            }
            AcquireOutcome::Timeout => Ok(AcquireOutcome::Timeout),
            AcquireOutcome::AccessLost => Ok(AcquireOutcome::AccessLost),
        }
    }
}

/// Tells frames of the live duplication apart from frames that outlived a
/// reinitialize or a dispose.
///
/// Devices stamp every acquired frame with [`current`](Self::current) and
/// check the stamp before touching the frame again, so a stale handle fails
/// with `UseAfterDispose` instead of being released into a new duplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameGeneration {
    current: u64,
    disposed: bool,
}

impl FrameGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp for a frame acquired now.
    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn ensure_live(&self, what: &str) -> Result<(), CaptureError> {
        if self.disposed {
            return Err(CaptureError::UseAfterDispose(what.into()));
        }
        Ok(())
    }

    pub fn check_frame(&self, stamp: u64) -> Result<(), CaptureError> {
        self.ensure_live("frame of a disposed display device")?;
        if stamp != self.current {
            return Err(CaptureError::UseAfterDispose("frame from a previous duplication".into()));
        }
        Ok(())
    }

    /// Invalidates every outstanding frame ahead of a reinitialize.
    pub fn advance(&mut self) -> Result<(), CaptureError> {
        self.ensure_live("reinitialize of a disposed display device")?;
        self.current += 1;
        Ok(())
    }

    /// Returns `false` when already disposed.
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;
        self.current += 1;
        true
    }
}

/// Opens display devices on the capture thread.
///
/// GPU objects must stay on the thread that created them, so the paced loop
/// receives a factory and opens (and later disposes) the device itself.
pub trait DisplayDeviceFactory: Send + Sync + 'static {
    type Device: DisplayDevice;

    /// Size the opened device will report, used to describe the video stream
    /// before capture starts.
    fn output_size(&self) -> Result<(u32, u32), CaptureError>;

    fn open(&self) -> Result<Self::Device, CaptureError>;
}
