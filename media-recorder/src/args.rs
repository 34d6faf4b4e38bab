//! Contains [Args], which are parsed command-line flags.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use media_capture_core::{CaptureError, RecorderConfig};

/// Parsed command line arguments.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(about = "Records the desktop and system audio into an MP4 file.")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List monitors with their global index.
    Monitors,
    /// List active audio endpoints.
    AudioDevices,
    /// Record until Enter is pressed or the duration elapses.
    Record(RecordArgs),
}

#[derive(ClapArgs, Debug, Clone, Default, PartialEq)]
pub struct RecordArgs {
    /// JSON configuration file. Flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Global monitor index (see `monitors`).
    #[arg(long)]
    pub monitor: Option<usize>,

    /// Capture and output frame rate.
    #[arg(long)]
    pub fps: Option<f64>,

    /// Stop automatically after this many seconds.
    #[arg(long)]
    pub duration: Option<f64>,

    /// Output file (default: output_YYYYMMDD_HHMMSS.mp4).
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Path to the ffmpeg executable.
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,

    /// Audio endpoint id (see `audio-devices`). Output devices are recorded
    /// in loopback. Defaults to the default output device.
    #[arg(long)]
    pub audio_device: Option<String>,

    /// Print the final report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RecordArgs {
    /// The configuration file (or defaults) with flag overrides applied.
    pub fn resolve_config(&self) -> Result<RecorderConfig, CaptureError> {
        let mut config = match &self.config {
            Some(path) => RecorderConfig::from_file(path)?,
            None => RecorderConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut RecorderConfig) {
        if let Some(monitor) = self.monitor {
            config.monitor_index = monitor;
        }
        if let Some(fps) = self.fps {
            config.video.frame_rate = fps;
        }
        if let Some(output) = &self.output {
            config.output_path = Some(output.clone());
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.encoder.program = ffmpeg.clone();
        }
        if let Some(device) = &self.audio_device {
            config.audio_device_id = Some(device.clone());
        }
    }

    /// Recording length limit, if any. Non-positive values mean no limit.
    pub fn duration(&self) -> Option<std::time::Duration> {
        self.duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(std::time::Duration::from_secs_f64)
    }
}
