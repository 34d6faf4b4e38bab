mod args;

use std::process::ExitCode;

use clap::Parser;

use media_capture_core::CaptureError;

use crate::args::{Args, Command};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn run(command: Command) -> Result<(), CaptureError> {
    if let Command::Record(record) = &command {
        // Still reports configuration mistakes before the platform check.
        record.resolve_config()?;
    }
    Err(CaptureError::ConfigurationFailed(
        "desktop and audio capture are only available on Windows".into(),
    ))
}

#[cfg(target_os = "windows")]
fn run(command: Command) -> Result<(), CaptureError> {
    match command {
        Command::Monitors => recorder::list_monitors(),
        Command::AudioDevices => recorder::list_audio_devices(),
        Command::Record(record) => recorder::record(&record),
    }
}

#[cfg(target_os = "windows")]
mod recorder {
    use std::io::BufRead;
    use std::sync::Arc;
    use std::thread;

    use media_capture_core::{
        AudioDirection, CancellationToken, CaptureError, DeviceEnumerator, EncodeReport, Pipeline, PipelineDelegate,
        PipelineState,
    };
    use media_capture_windows::{DxgiOutputFactory, WasapiCapture, WindowsDeviceEnumerator};

    use crate::args::RecordArgs;

    /// Forwards pipeline events to the log.
    struct LogDelegate;

    impl PipelineDelegate for LogDelegate {
        fn on_state_changed(&self, state: &PipelineState) {
            log::debug!("Pipeline state: {:?}", state);
        }

        fn on_error(&self, error: &CaptureError) {
            log::error!("Pipeline error: {}", error);
        }

        fn on_finished(&self, report: &EncodeReport) {
            log::info!(
                "Encoder finished after {:.1}s: {} frames, {} audio bytes",
                report.elapsed.as_secs_f64(),
                report.video.items,
                report.audio.bytes
            );
        }
    }

    pub fn list_monitors() -> Result<(), CaptureError> {
        let monitors = WindowsDeviceEnumerator::new().monitors()?;
        if monitors.is_empty() {
            println!("No monitors found.");
        }
        for m in monitors {
            println!(
                "[{}] {} {}x{} (adapter {}, output {}){}",
                m.global_index,
                m.device_name,
                m.width,
                m.height,
                m.adapter_id,
                m.output_id,
                if m.attached { "" } else { " detached" }
            );
        }
        Ok(())
    }

    pub fn list_audio_devices() -> Result<(), CaptureError> {
        let enumerator = WindowsDeviceEnumerator::new();
        for direction in [AudioDirection::Render, AudioDirection::Capture] {
            println!("{} devices:", direction);
            for d in enumerator.audio_devices(direction)? {
                println!(
                    "  {}{} ({} Hz, {} ch)\n    id: {}",
                    if d.is_default { "* " } else { "  " },
                    d.name,
                    d.sample_rate,
                    d.channels,
                    d.id
                );
            }
        }
        Ok(())
    }

    pub fn record(args: &RecordArgs) -> Result<(), CaptureError> {
        let config = args.resolve_config()?;

        let display = DxgiOutputFactory::for_index(config.monitor_index)?;
        let audio = match &config.audio_device_id {
            Some(id) => WasapiCapture::with_device(id)?,
            None => WasapiCapture::default_loopback()?,
        };
        let pipeline = Pipeline::from_config(display, audio, &config)?;
        pipeline.set_delegate(Arc::new(LogDelegate));

        let cancel = CancellationToken::new();
        pipeline.start(&cancel)?;

        println!("Recording to {}. Press Enter to stop.", pipeline.output_path().display());
        spawn_stop_triggers(&cancel, args.duration())?;

        let report = pipeline.wait()?;
        if args.json {
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| CaptureError::Unknown(format!("cannot serialize report: {}", e)))?;
            println!("{}", json);
        } else {
            let video = pipeline.video_diagnostics();
            println!(
                "Saved {} ({} frames: {} captured, {} duplicated, {} dropped)",
                report.output_path.display(),
                report.video.items,
                video.frames_captured,
                video.frames_duplicated,
                video.frames_dropped
            );
        }
        Ok(())
    }

    /// Cancels `cancel` on Enter and, with a duration, when it elapses.
    fn spawn_stop_triggers(cancel: &CancellationToken, duration: Option<std::time::Duration>) -> Result<(), CaptureError> {
        let on_enter = cancel.clone();
        thread::Builder::new()
            .name("stdin-stop".into())
            .spawn(move || {
                let mut line = String::new();
                let _ = std::io::stdin().lock().read_line(&mut line);
                on_enter.cancel();
            })
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn stdin thread: {}", e)))?;

        if let Some(duration) = duration {
            let on_timeout = cancel.clone();
            thread::Builder::new()
                .name("duration-stop".into())
                .spawn(move || {
                    if !on_timeout.wait_timeout(duration) {
                        log::info!("Duration of {:.1}s reached", duration.as_secs_f64());
                        on_timeout.cancel();
                    }
                })
                .map_err(|e| CaptureError::Unknown(format!("failed to spawn timer thread: {}", e)))?;
        }
        Ok(())
    }
}
