use super::error::CaptureError;

/// State of one capture source instance.
///
/// ```text
/// uninitialized → capturing → stopped
///                     ↑          │
///                     └──────────┘  (restart reopens the device)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Uninitialized,
    Capturing,
    Stopped,
}

impl CaptureState {
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Recording pipeline state machine.
///
/// ```text
/// idle → starting → running → stopping → stopped
///           ↓          ↓          ↓
///         failed     failed     failed
/// ```
///
/// A pipeline is single-use: neither terminal state leads back to running.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed(CaptureError),
}

impl PipelineState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Sources are live and the encoder may still be consuming.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }
}
