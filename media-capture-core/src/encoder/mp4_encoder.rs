use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as cb;
use parking_lot::Mutex;
use serde::Serialize;

use super::command::EncoderCommandBuilder;
use crate::models::config::EncoderConfig;
use crate::models::diagnostics::PipeStats;
use crate::models::error::CaptureError;
use crate::pipe::InputPipe;
use crate::processing::cancellation::CancellationToken;
use crate::traits::pipe_source::{PipeSource, StreamRole};

/// Lines of encoder stderr kept for failure reports.
const STDERR_TAIL_LINES: usize = 40;

/// Outcome of a finished encode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeReport {
    pub output_path: PathBuf,
    pub video: PipeStats,
    pub audio: PipeStats,
    pub elapsed: Duration,
    pub exit_code: Option<i32>,
}

/// Last lines the encoder printed to stderr.
#[derive(Clone)]
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES))),
        }
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn text(&self) -> String {
        self.lines.lock().iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Runs the external encoder with one audio and one video pipe input and
/// writes an H.264/AAC MP4.
///
/// ```text
/// [AudioPipeSource] → writer thread → InputPipe ─┐
///                                                 ├→ encoder process → output.mp4
/// [VideoPipeSource] → writer thread → InputPipe ─┘
/// ```
///
/// The encoder is never killed: it finishes once both inputs reach end of
/// stream, which happens when the capture sources stop or the writers are
/// cancelled.
pub struct Mp4Encoder {
    config: EncoderConfig,
    output_path: PathBuf,
    frame_rate: f64,
}

impl Mp4Encoder {
    pub fn new(config: EncoderConfig, output_path: impl Into<PathBuf>, frame_rate: f64) -> Self {
        Self {
            config,
            output_path: output_path.into(),
            frame_rate,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Full argument list for the given input URLs.
    pub fn arguments(&self, audio: &dyn PipeSource, audio_url: &str, video: &dyn PipeSource, video_url: &str) -> Vec<String> {
        EncoderCommandBuilder::from_config(&self.config, &self.output_path)
            .with_input(audio.input_arguments(), audio_url)
            .with_input(video.input_arguments(), video_url)
            .with_frame_rate(self.frame_rate)
            .build()
    }

    /// Launches the encoder and starts draining both sources into it.
    ///
    /// Cancelling `cancel` stops the writers, which closes the pipes and lets
    /// the encoder finalize the file. A launch failure is an `EncodeFailure`
    /// without exit code.
    pub fn start(
        &self,
        audio: Box<dyn PipeSource>,
        video: Box<dyn PipeSource>,
        cancel: &CancellationToken,
    ) -> Result<EncodeJob, CaptureError> {
        let audio_pipe = InputPipe::create(StreamRole::Audio)?;
        let video_pipe = InputPipe::create(StreamRole::Video)?;
        let args = self.arguments(audio.as_ref(), &audio_pipe.url(), video.as_ref(), &video_pipe.url());

        log::info!("Launching encoder: {} {}", self.config.program.display(), args.join(" "));
        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::EncodeFailure {
                exit_code: None,
                diagnostics: format!("failed to launch {}: {}", self.config.program.display(), e),
            })?;

        let started = Instant::now();
        let exited = Arc::new(AtomicBool::new(false));
        let writer_cancel = cancel.child_token();
        let tail = StderrTail::new();

        let spawned = (|| {
            let stderr = match child.stderr.take() {
                Some(stderr) => {
                    let tail = tail.clone();
                    Some(spawn_named("encoder-stderr", move || collect_stderr(stderr, &tail))?)
                }
                None => None,
            };
            let writers = vec![
                (
                    StreamRole::Audio,
                    spawn_writer(audio, audio_pipe, Arc::clone(&exited), writer_cancel.clone())?,
                ),
                (
                    StreamRole::Video,
                    spawn_writer(video, video_pipe, Arc::clone(&exited), writer_cancel.clone())?,
                ),
            ];
            Ok::<_, CaptureError>((stderr, writers))
        })();

        let (stderr, writers) = match spawned {
            Ok(parts) => parts,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                exited.store(true, Ordering::SeqCst);
                writer_cancel.cancel();
                return Err(e);
            }
        };

        let (exit_tx, exit_rx) = cb::bounded(0);
        let waiter = spawn_waiter(child, Arc::clone(&exited), writer_cancel.clone(), exit_tx).map_err(|e| {
            exited.store(true, Ordering::SeqCst);
            writer_cancel.cancel();
            e
        })?;

        Ok(EncodeJob {
            output_path: self.output_path.clone(),
            started,
            waiter,
            exit_signal: exit_rx,
            writers,
            stderr,
            tail,
        })
    }
}

/// A running encode. [`wait`](Self::wait) blocks until the process exits.
pub struct EncodeJob {
    output_path: PathBuf,
    started: Instant,
    waiter: thread::JoinHandle<io::Result<ExitStatus>>,
    exit_signal: cb::Receiver<()>,
    writers: Vec<(StreamRole, thread::JoinHandle<Result<PipeStats, CaptureError>>)>,
    stderr: Option<thread::JoinHandle<()>>,
    tail: StderrTail,
}

impl EncodeJob {
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Whether the encoder process has exited.
    pub fn is_finished(&self) -> bool {
        self.waiter.is_finished()
    }

    /// Disconnects once the encoder process has exited. Nothing is ever
    /// received on it.
    pub fn exit_signal(&self) -> &cb::Receiver<()> {
        &self.exit_signal
    }

    /// Waits for the encoder and both writers.
    ///
    /// A non-zero exit is an `EncodeFailure` carrying the tail of the
    /// encoder's stderr.
    pub fn wait(self) -> Result<EncodeReport, CaptureError> {
        let status = self
            .waiter
            .join()
            .map_err(|_| CaptureError::Unknown("encoder wait thread panicked".into()))?
            .map_err(|e| CaptureError::EncodeFailure {
                exit_code: None,
                diagnostics: format!("waiting for encoder failed: {}", e),
            })?;

        let mut report = EncodeReport {
            output_path: self.output_path,
            video: PipeStats::default(),
            audio: PipeStats::default(),
            elapsed: Duration::ZERO,
            exit_code: status.code(),
        };

        let mut writer_error = None;
        for (role, handle) in self.writers {
            match handle.join() {
                Ok(Ok(stats)) => match role {
                    StreamRole::Audio => report.audio = stats,
                    StreamRole::Video => report.video = stats,
                },
                Ok(Err(e)) => {
                    log::warn!("{} writer failed: {}", role, e);
                    writer_error.get_or_insert(e);
                }
                Err(_) => {
                    writer_error.get_or_insert(CaptureError::Unknown(format!("{} writer panicked", role)));
                }
            }
        }
        if let Some(handle) = self.stderr {
            let _ = handle.join();
        }
        report.elapsed = self.started.elapsed();

        if !status.success() {
            let diagnostics = self.tail.text();
            log::error!("Encoder exited with {}", status);
            return Err(CaptureError::EncodeFailure {
                exit_code: status.code(),
                diagnostics,
            });
        }
        if let Some(e) = writer_error {
            return Err(e);
        }

        log::info!(
            "Encoder finished in {:.1}s: {} video frames, {} audio chunks -> {}",
            report.elapsed.as_secs_f64(),
            report.video.items,
            report.audio.items,
            report.output_path.display()
        );
        Ok(report)
    }
}

fn spawn_named<T, F>(name: &str, f: F) -> Result<thread::JoinHandle<T>, CaptureError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(|e| CaptureError::Unknown(format!("failed to spawn {} thread: {}", name, e)))
}

fn spawn_writer(
    mut source: Box<dyn PipeSource>,
    mut pipe: InputPipe,
    exited: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> Result<thread::JoinHandle<Result<PipeStats, CaptureError>>, CaptureError> {
    let role = source.role();
    spawn_named(&format!("encoder-{}-writer", role), move || {
        // Keep waiting for the encoder even when cancelled: it blocks opening
        // this input until a writer shows up, and needs the EOF to finish.
        let abort = || exited.load(Ordering::SeqCst);
        let Some(mut file) = pipe.connect(&abort)? else {
            log::warn!("{} pipe: encoder exited without opening its input", role);
            return Ok(PipeStats::default());
        };
        let result = source.write_to(&mut file, &cancel);
        drop(file);
        result
    })
}

/// Waits for the encoder on its own thread, then cancels the writers so none
/// can hang on a dead process. If the thread cannot be spawned the encoder
/// is killed.
fn spawn_waiter(
    child: Child,
    exited: Arc<AtomicBool>,
    writer_cancel: CancellationToken,
    exit_tx: cb::Sender<()>,
) -> Result<thread::JoinHandle<io::Result<ExitStatus>>, CaptureError> {
    let slot = Arc::new(Mutex::new(Some(child)));
    let thread_slot = Arc::clone(&slot);

    let spawned = thread::Builder::new().name("encoder-wait".into()).spawn(move || {
        let status = match thread_slot.lock().take() {
            Some(mut child) => child.wait(),
            None => Err(io::Error::new(io::ErrorKind::Other, "encoder process missing")),
        };
        exited.store(true, Ordering::SeqCst);
        writer_cancel.cancel();
        drop(exit_tx);
        match &status {
            Ok(status) => log::info!("Encoder process exited: {}", status),
            Err(e) => log::error!("Waiting for encoder failed: {}", e),
        }
        status
    });

    spawned.map_err(|e| {
        if let Some(mut child) = slot.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        CaptureError::Unknown(format!("failed to spawn encoder-wait thread: {}", e))
    })
}

fn collect_stderr(stderr: impl Read, tail: &StderrTail) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if !line.is_empty() {
                    log::debug!("encoder: {}", line);
                    tail.push(line);
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::format::WaveFormat;
    use crate::models::frame::{AudioSample, MediaTimestamp, VideoFrame};
    use crate::pipe::audio_pipe::AudioPipeSource;
    use crate::pipe::video_pipe::VideoPipeSource;
    use crate::processing::media_queue::MediaQueue;
    use crate::testing::{fake_encoder, read_counts, scratch_dir, COUNTING_ENCODER};

    fn sources(video_frames: usize, audio_chunks: usize) -> (Box<dyn PipeSource>, Box<dyn PipeSource>) {
        let video_queue = Arc::new(MediaQueue::bounded(120));
        for _ in 0..video_frames {
            video_queue.try_push(VideoFrame::new(2, 2, vec![0; 16], MediaTimestamp::ZERO).unwrap());
        }
        video_queue.close();

        let audio_queue = Arc::new(MediaQueue::unbounded());
        for _ in 0..audio_chunks {
            audio_queue.try_push(AudioSample::new(vec![0; 8], 2, 48000, 16, MediaTimestamp::ZERO).unwrap());
        }
        audio_queue.close();

        (
            Box::new(AudioPipeSource::new(audio_queue, WaveFormat::pcm16(48000, 2))),
            Box::new(VideoPipeSource::new(video_queue, 2, 2, 30.0)),
        )
    }

    fn encoder(program: PathBuf, output: PathBuf) -> Mp4Encoder {
        let config = EncoderConfig {
            program,
            ..Default::default()
        };
        Mp4Encoder::new(config, output, 30.0)
    }

    #[test]
    fn streams_both_inputs_to_encoder() {
        let dir = scratch_dir();
        let output = dir.join("out.mp4");
        let (audio, video) = sources(5, 3);

        let job = encoder(fake_encoder(&dir, COUNTING_ENCODER), output.clone())
            .start(audio, video, &CancellationToken::new())
            .unwrap();
        let report = job.wait().unwrap();

        assert_eq!(read_counts(&output), vec![3 * 8, 5 * 16]);
        assert_eq!(report.video.items, 5);
        assert_eq!(report.audio.items, 3);
        assert_eq!(report.exit_code, Some(0));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let dir = scratch_dir();
        let script = fake_encoder(&dir, "echo 'Unrecognized option: bogus' >&2\nexit 3");
        let (audio, video) = sources(1, 1);

        let job = encoder(script, dir.join("out.mp4"))
            .start(audio, video, &CancellationToken::new())
            .unwrap();
        match job.wait() {
            Err(CaptureError::EncodeFailure { exit_code, diagnostics }) => {
                assert_eq!(exit_code, Some(3));
                assert!(diagnostics.contains("Unrecognized option"), "{}", diagnostics);
            }
            other => panic!("expected EncodeFailure, got {:?}", other),
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn exit_signal_disconnects_when_encoder_exits() {
        let dir = scratch_dir();
        let (audio, video) = sources(2, 2);

        let job = encoder(fake_encoder(&dir, COUNTING_ENCODER), dir.join("out.mp4"))
            .start(audio, video, &CancellationToken::new())
            .unwrap();
        assert_eq!(
            job.exit_signal().recv_timeout(Duration::from_secs(10)),
            Err(cb::RecvTimeoutError::Disconnected)
        );
        assert!(job.wait().is_ok());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_program_is_launch_failure() {
        let dir = scratch_dir();
        let (audio, video) = sources(0, 0);
        let result = encoder(dir.join("no-such-encoder"), dir.join("out.mp4")).start(
            audio,
            video,
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(CaptureError::EncodeFailure { exit_code: None, .. })
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn arguments_put_audio_first() {
        let (audio, video) = sources(0, 0);
        let args = encoder(PathBuf::from("ffmpeg"), PathBuf::from("o.mp4")).arguments(
            audio.as_ref(),
            "a.fifo",
            video.as_ref(),
            "v.fifo",
        );
        let audio_at = args.iter().position(|a| a == "a.fifo").unwrap();
        let video_at = args.iter().position(|a| a == "v.fifo").unwrap();
        assert!(audio_at < video_at);
        assert_eq!(args[audio_at - 7], "-f");
        assert_eq!(args[audio_at - 6], "s16le");
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let tail = StderrTail::new();
        for i in 0..(STDERR_TAIL_LINES + 10) {
            tail.push(format!("line {}", i));
        }
        let text = tail.text();
        assert_eq!(text.lines().count(), STDERR_TAIL_LINES);
        assert!(text.starts_with("line 10"));
    }
}
