use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::config::VideoCaptureConfig;
use crate::models::diagnostics::CaptureDiagnostics;
use crate::models::error::CaptureError;
use crate::models::frame::{MediaClock, MediaTimestamp, VideoFrame};
use crate::models::state::CaptureState;
use crate::processing::cancellation::CancellationToken;
use crate::processing::media_queue::{MediaQueue, PushOutcome, QueueReader, VideoFrameStream};
use crate::processing::pacer::FramePacer;
use crate::traits::display_device::{AcquireOutcome, DisplayDevice, DisplayDeviceFactory};

const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(1);

/// Paced display capture.
///
/// A dedicated thread opens the display device, then ticks at the configured
/// frame rate. Every tick enqueues either a fresh frame or a copy of the last
/// one, so the output cadence stays constant while the compositor delivers
/// irregularly. The queue is bounded and a full queue drops the frame; the
/// capture thread never blocks on the consumer.
///
/// ```text
/// [DisplayDevice] → tick (capture | duplicate | skip) → [MediaQueue<VideoFrame>] → consumer
/// ```
pub struct VideoSource<F: DisplayDeviceFactory> {
    factory: Arc<F>,
    config: VideoCaptureConfig,
    clock: MediaClock,
    size: (u32, u32),
    queue: Arc<MediaQueue<VideoFrame>>,
    diagnostics: Arc<Mutex<CaptureDiagnostics>>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    state: CaptureState,
}

impl<F: DisplayDeviceFactory> VideoSource<F> {
    pub fn new(factory: F, config: VideoCaptureConfig, clock: MediaClock) -> Result<Self, CaptureError> {
        config.validate()?;
        let size = factory.output_size()?;
        let queue = Arc::new(MediaQueue::bounded(config.queue_capacity));
        Ok(Self {
            factory: Arc::new(factory),
            config,
            clock,
            size,
            queue,
            diagnostics: Arc::new(Mutex::new(CaptureDiagnostics::default())),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            state: CaptureState::Uninitialized,
        })
    }

    pub fn width(&self) -> u32 {
        self.size.0
    }

    pub fn height(&self) -> u32 {
        self.size.1
    }

    pub fn frame_rate(&self) -> f64 {
        self.config.frame_rate
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn diagnostics(&self) -> CaptureDiagnostics {
        *self.diagnostics.lock()
    }

    pub fn queue(&self) -> Arc<MediaQueue<VideoFrame>> {
        Arc::clone(&self.queue)
    }

    /// Lazily pulled frames in capture order. Ends after `stop` once the
    /// queue is drained, or when `cancel` fires.
    pub fn frames(&self, cancel: &CancellationToken) -> VideoFrameStream {
        QueueReader::new(self.queue(), cancel.clone())
    }

    /// Opens the device on a new capture thread and starts ticking.
    ///
    /// A no-op while already capturing. Returns the device's initialization
    /// error if it cannot be opened.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state.is_capturing() {
            return Ok(());
        }

        self.queue.reopen();
        self.running.store(true, Ordering::SeqCst);

        let (init_tx, init_rx) = mpsc::sync_channel::<Result<(), CaptureError>>(1);
        let context = LoopContext {
            queue: Arc::clone(&self.queue),
            diagnostics: Arc::clone(&self.diagnostics),
            running: Arc::clone(&self.running),
            clock: self.clock,
            period: self.config.frame_period(),
            acquire_timeout: self.config.acquire_timeout(),
        };
        let factory = Arc::clone(&self.factory);

        let handle = thread::Builder::new()
            .name("paced-display-capture".into())
            .spawn(move || {
                let mut device = match factory.open() {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));
                run_capture_loop(&mut device, &context);
                device.dispose();
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::DeviceInit(format!("failed to spawn capture thread: {}", e))
            })?;

        let init = init_rx
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::DeviceInit("capture thread exited during startup".into())));
        if let Err(e) = init {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            log::error!("Display capture failed to start: {}", e);
            return Err(e);
        }

        log::info!(
            "Display capture started: {}x{} @ {} fps, queue capacity {}",
            self.size.0,
            self.size.1,
            self.config.frame_rate,
            self.config.queue_capacity
        );
        self.handle = Some(handle);
        self.state = CaptureState::Capturing;
        Ok(())
    }

    /// Stops the capture thread and marks end of stream on the queue.
    ///
    /// No frame is enqueued after this returns. A no-op unless capturing.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        if handle.join().is_err() {
            log::error!("Display capture thread panicked");
        }
        self.queue.close();
        self.state = CaptureState::Stopped;

        let diag = self.diagnostics();
        log::info!(
            "Display capture stopped: {} captured, {} duplicated, {} dropped, {} reinitializations",
            diag.frames_captured,
            diag.frames_duplicated,
            diag.frames_dropped,
            diag.reinitializations
        );
    }
}

impl<F: DisplayDeviceFactory> Drop for VideoSource<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopContext {
    queue: Arc<MediaQueue<VideoFrame>>,
    diagnostics: Arc<Mutex<CaptureDiagnostics>>,
    running: Arc<AtomicBool>,
    clock: MediaClock,
    period: Duration,
    acquire_timeout: Duration,
}

/// Per-thread capture state carried between ticks.
struct TickState {
    last_frame: Option<VideoFrame>,
    needs_reinit: bool,
}

fn run_capture_loop<D: DisplayDevice>(device: &mut D, ctx: &LoopContext) {
    let mut pacer = FramePacer::new(ctx.period);
    let mut tick_state = TickState {
        last_frame: None,
        needs_reinit: false,
    };
    let mut window_start = Instant::now();
    let mut window_frames = 0u32;

    while ctx.running.load(Ordering::SeqCst) {
        pacer.wait_until_due();
        if !ctx.running.load(Ordering::SeqCst) {
            break;
        }

        let timestamp = ctx.clock.now();
        if let Some(frame) = tick(device, &mut tick_state, timestamp, ctx) {
            match ctx.queue.try_push(frame) {
                PushOutcome::Queued => window_frames += 1,
                PushOutcome::Full => ctx.diagnostics.lock().frames_dropped += 1,
                PushOutcome::Closed => {}
            }
        }

        let now = Instant::now();
        if pacer.advance(now) {
            log::trace!("Capture tick overran, deadline resynchronized");
        }

        let window = now.duration_since(window_start);
        if window >= DIAGNOSTICS_INTERVAL {
            let diag = *ctx.diagnostics.lock();
            log::debug!(
                "Capture: {:.1} fps, queue {}/{}, captured {}, duplicated {}, dropped {}",
                window_frames as f64 / window.as_secs_f64(),
                ctx.queue.len(),
                ctx.queue.capacity().unwrap_or(0),
                diag.frames_captured,
                diag.frames_duplicated,
                diag.frames_dropped
            );
            window_start = now;
            window_frames = 0;
        }
    }
}

/// One pacing tick. Returns the frame to enqueue, if any.
///
/// Errors never escape: they are counted and the tick falls back to the
/// last frame so the loop keeps its cadence.
fn tick<D: DisplayDevice>(
    device: &mut D,
    state: &mut TickState,
    timestamp: MediaTimestamp,
    ctx: &LoopContext,
) -> Option<VideoFrame> {
    if state.needs_reinit {
        if let Err(e) = reinitialize(device, ctx) {
            log::warn!("Display reinitialization failed, retrying next tick: {}", e);
            ctx.diagnostics.lock().tick_errors += 1;
            return duplicate_last(state, timestamp, ctx);
        }
        state.needs_reinit = false;
    }

    match device.capture_frame(ctx.acquire_timeout, timestamp) {
        Ok(AcquireOutcome::Frame(frame)) => {
            ctx.diagnostics.lock().frames_captured += 1;
            state.last_frame = Some(frame.clone());
            Some(frame)
        }
        Ok(AcquireOutcome::Timeout) => duplicate_last(state, timestamp, ctx),
        Ok(AcquireOutcome::AccessLost) => {
            log::warn!("Display access lost, reinitializing duplication");
            ctx.diagnostics.lock().access_lost_events += 1;
            if let Err(e) = reinitialize(device, ctx) {
                log::warn!("Display reinitialization failed: {}", e);
                state.needs_reinit = true;
            }
            duplicate_last(state, timestamp, ctx)
        }
        Err(e) => {
            log::warn!("Capture tick failed: {}", e);
            ctx.diagnostics.lock().tick_errors += 1;
            if !e.is_recoverable() {
                state.needs_reinit = true;
            }
            duplicate_last(state, timestamp, ctx)
        }
    }
}

fn reinitialize<D: DisplayDevice>(device: &mut D, ctx: &LoopContext) -> Result<(), CaptureError> {
    device.reinitialize()?;
    ctx.diagnostics.lock().reinitializations += 1;
    log::info!("Display duplication reinitialized");
    Ok(())
}

fn duplicate_last(state: &TickState, timestamp: MediaTimestamp, ctx: &LoopContext) -> Option<VideoFrame> {
    let mut diag = ctx.diagnostics.lock();
    match &state.last_frame {
        Some(last) => {
            diag.frames_duplicated += 1;
            Some(last.duplicate(timestamp))
        }
        None => {
            diag.ticks_skipped += 1;
            None
        }
    }
}
