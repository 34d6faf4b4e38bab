use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::models::diagnostics::PipeStats;
use crate::models::error::CaptureError;
use crate::processing::cancellation::CancellationToken;
use crate::traits::pipe_source::StreamRole;

/// Largest single write, so a slow reader never holds a whole frame's worth
/// of cancellation latency.
const WRITE_CHUNK: usize = 64 * 1024;
/// Back-off while a non-blocking sink is full.
const FULL_PIPE_WAIT: Duration = Duration::from_millis(5);

/// Writes each item's payload to `sink` back to back, then flushes.
///
/// Items are dropped as soon as they are written. Stops when `items` ends or
/// `cancel` fires. Cancellation is seen between chunks and while a
/// non-blocking sink reports `WouldBlock`; a blocking sink that never
/// accepts a chunk holds the writer until its reader goes away.
pub(crate) fn drain_into<I, T, P>(
    role: StreamRole,
    items: I,
    sink: &mut dyn Write,
    cancel: &CancellationToken,
    payload: P,
) -> Result<PipeStats, CaptureError>
where
    I: Iterator<Item = T>,
    P: Fn(&T) -> &[u8],
{
    let started = Instant::now();
    let mut stats = PipeStats::default();

    for item in items {
        let bytes = payload(&item);
        let complete = write_cancellable(sink, bytes, cancel)
            .map_err(|e| CaptureError::Pipe(format!("{} pipe write failed: {}", role, e)))?;
        if !complete {
            log::warn!("{} pipe: cancelled in the middle of item {}", role, stats.items + 1);
            break;
        }
        stats.items += 1;
        stats.bytes += bytes.len() as u64;
        stats.elapsed = started.elapsed();

        if stats.items == 1 {
            log::info!("{} pipe: first item written ({} bytes)", role, bytes.len());
        } else if stats.items % 60 == 0 {
            log::debug!(
                "{} pipe: {} items written, {:.1} items/s",
                role,
                stats.items,
                stats.items_per_second()
            );
        }
    }

    flush(sink)
        .map_err(|e| CaptureError::Pipe(format!("{} pipe flush failed: {}", role, e)))?;
    stats.elapsed = started.elapsed();
    log::info!(
        "{} pipe finished: {} items, {} bytes in {:.1}s ({:.1} items/s)",
        role,
        stats.items,
        stats.bytes,
        stats.elapsed.as_secs_f64(),
        stats.items_per_second()
    );
    Ok(stats)
}

/// `write_all` that gives up when `cancel` fires. Returns whether every byte
/// was written.
fn write_cancellable(sink: &mut dyn Write, mut bytes: &[u8], cancel: &CancellationToken) -> io::Result<bool> {
    while !bytes.is_empty() {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let chunk = &bytes[..bytes.len().min(WRITE_CHUNK)];
        match sink.write(chunk) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "pipe accepted no bytes")),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                cancel.wait_timeout(FULL_PIPE_WAIT);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn flush(sink: &mut dyn Write) -> io::Result<()> {
    loop {
        match sink.flush() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted || e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(FULL_PIPE_WAIT)
            }
            other => return other,
        }
    }
}
