use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam_channel as cb;
use parking_lot::{Condvar, Mutex};

use crate::capture::audio_source::AudioSource;
use crate::capture::video_source::VideoSource;
use crate::encoder::mp4_encoder::{EncodeJob, EncodeReport, Mp4Encoder};
use crate::models::config::RecorderConfig;
use crate::models::diagnostics::{AudioDiagnostics, CaptureDiagnostics};
use crate::models::error::CaptureError;
use crate::models::frame::MediaClock;
use crate::models::state::PipelineState;
use crate::pipe::audio_pipe::AudioPipeSource;
use crate::pipe::video_pipe::VideoPipeSource;
use crate::processing::cancellation::CancellationToken;
use crate::traits::audio_device::AudioCaptureDevice;
use crate::traits::display_device::DisplayDeviceFactory;
use crate::traits::pipeline_delegate::PipelineDelegate;

/// Lifecycle data guarded by one lock. Frame and sample flow never touches it.
struct Lifecycle {
    state: PipelineState,
    outcome: Option<Result<EncodeReport, CaptureError>>,
}

struct PipelineInner<F: DisplayDeviceFactory, D: AudioCaptureDevice> {
    video: Mutex<VideoSource<F>>,
    audio: Mutex<AudioSource<D>>,
    encoder: Mp4Encoder,
    lifecycle: Mutex<Lifecycle>,
    finished: Condvar,
    delegate: Mutex<Option<Arc<dyn PipelineDelegate>>>,
}

/// Desktop + system audio recording into one MP4.
///
/// ```text
/// [VideoSource] → VideoPipeSource ─┐
///                                   ├→ [Mp4Encoder] → output.mp4
/// [AudioSource] → AudioPipeSource ─┘
/// ```
///
/// Single-use: once stopped or failed it cannot be started again; build a
/// new pipeline instead. Cloning shares the same recording.
pub struct Pipeline<F: DisplayDeviceFactory, D: AudioCaptureDevice> {
    inner: Arc<PipelineInner<F, D>>,
}

impl<F: DisplayDeviceFactory, D: AudioCaptureDevice> Clone for Pipeline<F, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, D> Pipeline<F, D>
where
    F: DisplayDeviceFactory,
    D: AudioCaptureDevice + 'static,
{
    pub fn new(video: VideoSource<F>, audio: AudioSource<D>, encoder: Mp4Encoder) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                video: Mutex::new(video),
                audio: Mutex::new(audio),
                encoder,
                lifecycle: Mutex::new(Lifecycle {
                    state: PipelineState::Idle,
                    outcome: None,
                }),
                finished: Condvar::new(),
                delegate: Mutex::new(None),
            }),
        }
    }

    /// Builds both sources on a shared clock plus the encoder for `config`.
    ///
    /// Configuration problems, including an unsupported audio output format,
    /// fail here.
    pub fn from_config(factory: F, audio_device: D, config: &RecorderConfig) -> Result<Self, CaptureError> {
        config.validate()?;
        let clock = MediaClock::new();
        let video = VideoSource::new(factory, config.video.clone(), clock)?;
        let audio = AudioSource::new(audio_device, config.audio.clone(), clock)?;
        let encoder = Mp4Encoder::new(
            config.encoder.clone(),
            config.resolved_output_path(),
            config.video.frame_rate,
        );
        Ok(Self::new(video, audio, encoder))
    }

    pub fn set_delegate(&self, delegate: Arc<dyn PipelineDelegate>) {
        *self.inner.delegate.lock() = Some(delegate);
    }

    pub fn state(&self) -> PipelineState {
        self.inner.lifecycle.lock().state.clone()
    }

    pub fn output_path(&self) -> PathBuf {
        self.inner.encoder.output_path().to_path_buf()
    }

    pub fn video_diagnostics(&self) -> CaptureDiagnostics {
        self.inner.video.lock().diagnostics()
    }

    pub fn audio_diagnostics(&self) -> AudioDiagnostics {
        self.inner.audio.lock().diagnostics()
    }

    /// Starts both sources and launches the encoder.
    ///
    /// Fails with `InvalidState` unless the pipeline is idle. A
    /// `pipeline-watch` thread then owns the encode: cancelling `cancel`
    /// behaves like [`stop`](Self::stop), and an encoder that exits on its
    /// own stops capture. Neither needs a caller in [`wait`](Self::wait).
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), CaptureError> {
        self.inner.start(cancel)
    }

    /// Stops both sources; the encoder drains what was captured and exits on
    /// its own. Idempotent, and a no-op before `start`.
    pub fn stop(&self) -> Result<(), CaptureError> {
        self.inner.stop()
    }

    /// Blocks until the encoder exits. Any number of callers may wait; all
    /// receive the same outcome.
    pub fn wait(&self) -> Result<EncodeReport, CaptureError> {
        self.inner.wait()
    }

    /// `start` followed by `wait` on a background thread.
    pub fn start_async(
        &self,
        cancel: CancellationToken,
    ) -> Result<thread::JoinHandle<Result<EncodeReport, CaptureError>>, CaptureError> {
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("pipeline-encode".into())
            .spawn(move || {
                inner.start(&cancel)?;
                inner.wait()
            })
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn pipeline thread: {}", e)))
    }

    /// `stop` followed by `wait` on a background thread. Resolves to
    /// `InvalidState` if the pipeline was never started.
    pub fn stop_async(&self) -> Result<thread::JoinHandle<Result<EncodeReport, CaptureError>>, CaptureError> {
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("pipeline-stop".into())
            .spawn(move || {
                inner.stop()?;
                inner.wait()
            })
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn pipeline thread: {}", e)))
    }
}

impl<F, D> PipelineInner<F, D>
where
    F: DisplayDeviceFactory,
    D: AudioCaptureDevice + 'static,
{
    fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Result<(), CaptureError> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.state.is_idle() {
            return Err(CaptureError::InvalidState(format!(
                "pipeline cannot start from {:?}",
                lifecycle.state
            )));
        }
        // Held through the launch so a concurrent start cannot slip in.
        lifecycle.state = PipelineState::Starting;

        match self.launch(cancel) {
            Ok(job) => {
                lifecycle.state = PipelineState::Running;
                drop(lifecycle);

                log::info!("Recording to {}", self.encoder.output_path().display());
                self.notify_state(&PipelineState::Starting);
                self.notify_state(&PipelineState::Running);
                self.spawn_watcher(job, cancel.clone())
            }
            Err(e) => {
                let failed = PipelineState::Failed(e.clone());
                lifecycle.state = failed.clone();
                lifecycle.outcome = Some(Err(e.clone()));
                drop(lifecycle);
                self.finished.notify_all();

                log::error!("Pipeline failed to start: {}", e);
                self.notify_state(&PipelineState::Starting);
                self.notify_state(&failed);
                self.notify_error(&e);
                Err(e)
            }
        }
    }

    fn launch(&self, cancel: &CancellationToken) -> Result<EncodeJob, CaptureError> {
        self.video.lock().start()?;
        if let Err(e) = self.audio.lock().start() {
            self.video.lock().stop();
            return Err(e);
        }

        let video_pipe = {
            let video = self.video.lock();
            VideoPipeSource::new(video.queue(), video.width(), video.height(), video.frame_rate())
        };
        let audio_pipe = {
            let audio = self.audio.lock();
            AudioPipeSource::new(audio.queue(), audio.output_format())
        };

        self.encoder
            .start(Box::new(audio_pipe), Box::new(video_pipe), cancel)
            .map_err(|e| {
                self.stop_sources();
                e
            })
    }

    /// Hands the encode to its own thread. If that thread cannot be spawned
    /// the job is dropped; its writers and encoder still finish once capture
    /// stops, and the pipeline fails.
    fn spawn_watcher(self: &Arc<Self>, job: EncodeJob, cancel: CancellationToken) -> Result<(), CaptureError> {
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("pipeline-watch".into())
            .spawn(move || inner.watch(job, &cancel));
        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                let e = CaptureError::Unknown(format!("failed to spawn pipeline watcher: {}", e));
                self.stop_sources();
                self.finish(Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Runs until the encoder exits, turning cancellation into a regular stop.
    fn watch(&self, job: EncodeJob, cancel: &CancellationToken) {
        cb::select! {
            recv(cancel.signal()) -> _ => {}
            recv(job.exit_signal()) -> _ => {}
        }
        if cancel.is_cancelled() {
            log::info!("Recording cancelled");
            if let Err(e) = self.stop() {
                log::warn!("Stop after cancellation failed: {}", e);
            }
        }
        let result = job.wait();
        // The encoder may have exited on its own; capture must not outlive it.
        self.stop_sources();
        self.finish(result);
    }

    fn stop(&self) -> Result<(), CaptureError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.state.is_running() {
                return Ok(());
            }
            lifecycle.state = PipelineState::Stopping;
        }
        log::info!("Stopping pipeline, waiting for the encoder to drain");
        self.notify_state(&PipelineState::Stopping);
        self.stop_sources();
        Ok(())
    }

    fn stop_sources(&self) {
        self.video.lock().stop();
        if let Err(e) = self.audio.lock().stop() {
            log::warn!("Audio capture did not stop cleanly: {}", e);
        }
    }

    fn wait(&self) -> Result<EncodeReport, CaptureError> {
        let mut lifecycle = self.lifecycle.lock();
        loop {
            if let Some(outcome) = &lifecycle.outcome {
                return outcome.clone();
            }
            if lifecycle.state.is_idle() {
                return Err(CaptureError::InvalidState("pipeline was never started".into()));
            }
            self.finished.wait(&mut lifecycle);
        }
    }

    fn finish(&self, result: Result<EncodeReport, CaptureError>) {
        let state = match &result {
            Ok(_) => PipelineState::Stopped,
            Err(e) => PipelineState::Failed(e.clone()),
        };
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = state.clone();
            lifecycle.outcome = Some(result.clone());
        }
        self.finished.notify_all();

        self.notify_state(&state);
        match &result {
            Ok(report) => {
                if let Some(delegate) = self.delegate() {
                    delegate.on_finished(report);
                }
            }
            Err(e) => {
                log::error!("Recording failed: {}", e);
                self.notify_error(e);
            }
        }
    }

    fn delegate(&self) -> Option<Arc<dyn PipelineDelegate>> {
        self.delegate.lock().clone()
    }

    fn notify_state(&self, state: &PipelineState) {
        if let Some(delegate) = self.delegate() {
            delegate.on_state_changed(state);
        }
    }

    fn notify_error(&self, error: &CaptureError) {
        if let Some(delegate) = self.delegate() {
            delegate.on_error(error);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::format::WaveFormat;
    use crate::testing::{
        fake_encoder, read_counts, scratch_dir, MockAudioDevice, MockDisplayFactory, COUNTING_ENCODER,
    };
    use std::path::Path;
    use std::time::{Duration, Instant};

    type TestPipeline = Pipeline<MockDisplayFactory, MockAudioDevice>;

    fn config(dir: &Path, script: &str) -> RecorderConfig {
        let mut config = RecorderConfig::default();
        config.video.frame_rate = 30.0;
        config.encoder.program = fake_encoder(dir, script);
        config.output_path = Some(dir.join("recording.mp4"));
        config
    }

    fn pipeline(dir: &Path, script: &str) -> TestPipeline {
        pipeline_with(MockDisplayFactory::new(8, 8), dir, script)
    }

    /// Polls until the pipeline reaches Stopped or Failed on its own.
    fn await_terminal(pipeline: &TestPipeline) -> PipelineState {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let state = pipeline.state();
            if state.is_terminal() || Instant::now() > deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn pipeline_with(factory: MockDisplayFactory, dir: &Path, script: &str) -> TestPipeline {
        let audio = MockAudioDevice::new(WaveFormat::pcm16(48000, 2)).with_generator(480, Duration::from_millis(10));
        Pipeline::from_config(factory, audio, &config(dir, script)).unwrap()
    }

    #[derive(Default)]
    struct RecordingDelegate {
        states: Mutex<Vec<PipelineState>>,
        errors: Mutex<Vec<CaptureError>>,
        finished: Mutex<Option<EncodeReport>>,
    }

    impl PipelineDelegate for RecordingDelegate {
        fn on_state_changed(&self, state: &PipelineState) {
            self.states.lock().push(state.clone());
        }

        fn on_error(&self, error: &CaptureError) {
            self.errors.lock().push(error.clone());
        }

        fn on_finished(&self, report: &EncodeReport) {
            *self.finished.lock() = Some(report.clone());
        }
    }

    #[test]
    fn records_until_stopped() {
        let dir = scratch_dir();
        let pipeline = pipeline(&dir, COUNTING_ENCODER);
        let delegate = Arc::new(RecordingDelegate::default());
        pipeline.set_delegate(delegate.clone());

        pipeline.start(&CancellationToken::new()).unwrap();
        assert!(pipeline.state().is_running());
        thread::sleep(Duration::from_millis(300));
        pipeline.stop().unwrap();
        let report = pipeline.wait().unwrap();

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(report.video.items > 0);
        assert!(report.audio.items > 0);
        assert_eq!(report.video.bytes, report.video.items * 8 * 8 * 4);
        assert_eq!(read_counts(&pipeline.output_path()), vec![report.audio.bytes, report.video.bytes]);

        assert_eq!(
            *delegate.states.lock(),
            vec![
                PipelineState::Starting,
                PipelineState::Running,
                PipelineState::Stopping,
                PipelineState::Stopped,
            ]
        );
        assert_eq!(delegate.finished.lock().as_ref(), Some(&report));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn start_is_rejected_unless_idle() {
        let dir = scratch_dir();
        let pipeline = pipeline(&dir, COUNTING_ENCODER);
        let cancel = CancellationToken::new();

        pipeline.start(&cancel).unwrap();
        assert!(matches!(pipeline.start(&cancel), Err(CaptureError::InvalidState(_))));

        pipeline.stop().unwrap();
        pipeline.stop().unwrap();
        pipeline.wait().unwrap();
        assert!(matches!(pipeline.start(&cancel), Err(CaptureError::InvalidState(_))));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn stop_and_wait_before_start() {
        let dir = scratch_dir();
        let pipeline = pipeline(&dir, COUNTING_ENCODER);

        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(matches!(pipeline.wait(), Err(CaptureError::InvalidState(_))));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn cancellation_is_a_normal_stop() {
        let dir = scratch_dir();
        let pipeline = pipeline(&dir, COUNTING_ENCODER);
        let cancel = CancellationToken::new();

        pipeline.start(&cancel).unwrap();
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();

        assert!(pipeline.wait().is_ok());
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn cancellation_stops_capture_without_a_waiter() {
        let dir = scratch_dir();
        let pipeline = pipeline(&dir, COUNTING_ENCODER);
        let delegate = Arc::new(RecordingDelegate::default());
        pipeline.set_delegate(delegate.clone());
        let cancel = CancellationToken::new();

        pipeline.start(&cancel).unwrap();
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();

        assert_eq!(await_terminal(&pipeline), PipelineState::Stopped);
        assert!(pipeline.inner.video.lock().state().is_stopped());
        assert!(pipeline.inner.audio.lock().state().is_stopped());

        let enqueued = pipeline.audio_diagnostics().samples_enqueued;
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pipeline.audio_diagnostics().samples_enqueued, enqueued);
        assert!(delegate.states.lock().contains(&PipelineState::Stopping));
        assert!(pipeline.wait().is_ok());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn encoder_exit_stops_capture_without_a_waiter() {
        let dir = scratch_dir();
        let pipeline = pipeline(&dir, "exit 0");

        pipeline.start(&CancellationToken::new()).unwrap();

        assert_eq!(await_terminal(&pipeline), PipelineState::Stopped);
        assert!(pipeline.inner.video.lock().state().is_stopped());
        assert!(pipeline.inner.audio.lock().state().is_stopped());
        let report = pipeline.wait().unwrap();
        assert_eq!(report.exit_code, Some(0));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn encoder_failure_fails_pipeline_and_stops_capture() {
        let dir = scratch_dir();
        let pipeline = pipeline(&dir, "echo 'Conversion failed!' >&2\nexit 1");
        let delegate = Arc::new(RecordingDelegate::default());
        pipeline.set_delegate(delegate.clone());

        pipeline.start(&CancellationToken::new()).unwrap();
        let err = pipeline.wait().unwrap_err();

        match &err {
            CaptureError::EncodeFailure { exit_code, diagnostics } => {
                assert_eq!(*exit_code, Some(1));
                assert!(diagnostics.contains("Conversion failed!"));
            }
            other => panic!("expected EncodeFailure, got {:?}", other),
        }
        assert_eq!(pipeline.state(), PipelineState::Failed(err.clone()));
        assert_eq!(*delegate.errors.lock(), vec![err]);
        assert!(pipeline.inner.video.lock().state().is_stopped());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn device_failure_fails_start() {
        let dir = scratch_dir();
        let pipeline = pipeline_with(MockDisplayFactory::new(8, 8).failing_open(), &dir, COUNTING_ENCODER);

        let err = pipeline.start(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceInit(_)));
        assert!(pipeline.state().is_terminal());
        assert!(matches!(pipeline.wait(), Err(CaptureError::DeviceInit(_))));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn async_start_and_stop_share_the_outcome() {
        let dir = scratch_dir();
        let pipeline = pipeline(&dir, COUNTING_ENCODER);

        let running = pipeline.start_async(CancellationToken::new()).unwrap();
        while !pipeline.state().is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(100));
        let stopping = pipeline.stop_async().unwrap();

        let from_start = running.join().unwrap().unwrap();
        let from_stop = stopping.join().unwrap().unwrap();
        assert_eq!(from_start, from_stop);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        let _ = std::fs::remove_dir_all(dir);
    }
}
