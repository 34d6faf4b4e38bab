use crate::encoder::mp4_encoder::EncodeReport;
use crate::models::error::CaptureError;
use crate::models::state::PipelineState;

/// Observer for recording pipeline events.
///
/// Called from whichever thread drives the transition (the caller of
/// `start`/`stop`, or the thread waiting on the encoder), never while the
/// pipeline's lifecycle lock is held. Marshal to a UI thread if needed.
pub trait PipelineDelegate: Send + Sync {
    fn on_state_changed(&self, state: &PipelineState);

    fn on_error(&self, error: &CaptureError);

    /// Called once the encoder has exited cleanly and the file is complete.
    fn on_finished(&self, report: &EncodeReport);
}
