use std::fmt;
use std::io::Write;

use crate::models::diagnostics::PipeStats;
use crate::models::error::CaptureError;
use crate::processing::cancellation::CancellationToken;

/// Which encoder input a stream feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    Audio,
    Video,
}

impl StreamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw media stream drained into one encoder input.
///
/// Items are written back to back with no framing; the encoder learns the
/// layout once from [`input_arguments`](Self::input_arguments).
pub trait PipeSource: Send {
    fn role(&self) -> StreamRole;

    /// Raw-format options that describe this stream to the encoder, placed
    /// before its `-i`.
    fn input_arguments(&self) -> Vec<String>;

    /// Writes items until end of stream or cancellation, then flushes.
    ///
    /// Cancellation is observed between write chunks. On a sink that blocks
    /// inside `write` it takes effect once that call returns.
    fn write_to(&mut self, sink: &mut dyn Write, cancel: &CancellationToken) -> Result<PipeStats, CaptureError>;
}
