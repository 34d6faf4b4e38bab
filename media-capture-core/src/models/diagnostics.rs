use std::time::Duration;

use serde::Serialize;

/// Counters kept by the paced capture loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureDiagnostics {
    /// Fresh frames read back from the device.
    pub frames_captured: u64,
    /// Ticks filled with a copy of the previous frame.
    pub frames_duplicated: u64,
    /// Frames discarded because the queue was full.
    pub frames_dropped: u64,
    /// Ticks with nothing to enqueue (no frame captured yet).
    pub ticks_skipped: u64,
    pub tick_errors: u64,
    pub access_lost_events: u64,
    pub reinitializations: u64,
}

impl CaptureDiagnostics {
    /// Frames handed to the queue.
    pub fn frames_enqueued(&self) -> u64 {
        (self.frames_captured + self.frames_duplicated).saturating_sub(self.frames_dropped)
    }
}

/// Counters kept by the audio ingestion path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AudioDiagnostics {
    pub callbacks: u64,
    pub samples_enqueued: u64,
    pub bytes_enqueued: u64,
    /// Buffers that failed conversion or validation.
    pub buffers_rejected: u64,
    pub source_format: String,
    pub target_format: String,
}

/// Totals for one stream written to the encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipeStats {
    pub items: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl PipeStats {
    pub fn items_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.items as f64 / secs
        }
    }
}
