use std::path::{Path, PathBuf};

use crate::models::config::EncoderConfig;
use crate::pipe::video_pipe::format_rate;

#[derive(Debug, Clone)]
struct EncoderInput {
    arguments: Vec<String>,
    url: String,
}

/// Builds the encoder argument list: raw inputs in the order added, then
/// fixed H.264/AAC codec options and an MP4 output.
#[derive(Debug, Clone)]
pub struct EncoderCommandBuilder {
    inputs: Vec<EncoderInput>,
    video_codec: String,
    audio_codec: String,
    pixel_format: String,
    frame_rate: f64,
    overwrite: bool,
    fast_start: bool,
    output_path: PathBuf,
}

impl EncoderCommandBuilder {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self::from_config(&EncoderConfig::default(), output_path)
    }

    pub fn from_config(config: &EncoderConfig, output_path: impl Into<PathBuf>) -> Self {
        Self {
            inputs: Vec::new(),
            video_codec: config.video_codec.clone(),
            audio_codec: config.audio_codec.clone(),
            pixel_format: config.pixel_format.clone(),
            frame_rate: 60.0,
            overwrite: config.overwrite,
            fast_start: config.fast_start,
            output_path: output_path.into(),
        }
    }

    /// Adds an input described by raw-format `arguments` and read from `url`.
    pub fn with_input(mut self, arguments: Vec<String>, url: impl Into<String>) -> Self {
        self.inputs.push(EncoderInput {
            arguments,
            url: url.into(),
        });
        self
    }

    /// Output frame rate; matches the capture pacing rate.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = codec.into();
        self
    }

    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = codec.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn build(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into()];
        args.push(if self.overwrite { "-y" } else { "-n" }.into());

        for input in &self.inputs {
            args.extend(input.arguments.iter().cloned());
            args.push("-i".into());
            args.push(input.url.clone());
        }

        args.extend([
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-pix_fmt".to_string(),
            self.pixel_format.clone(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-r".to_string(),
            format_rate(self.frame_rate),
            "-f".to_string(),
            "mp4".to_string(),
        ]);
        if self.fast_start {
            args.push("-movflags".into());
            args.push("+faststart".into());
        }
        args.push(self.output_path.to_string_lossy().into_owned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_command_layout() {
        let args = EncoderCommandBuilder::new("out.mp4")
            .with_input(strings(&["-f", "s16le", "-ar", "48000", "-ac", "2"]), "audio.fifo")
            .with_input(
                strings(&["-f", "rawvideo", "-pix_fmt", "bgra", "-video_size", "640x480", "-framerate", "30"]),
                "video.fifo",
            )
            .with_frame_rate(30.0)
            .build();

        assert_eq!(
            args,
            strings(&[
                "-hide_banner", "-nostdin", "-y",
                "-f", "s16le", "-ar", "48000", "-ac", "2", "-i", "audio.fifo",
                "-f", "rawvideo", "-pix_fmt", "bgra", "-video_size", "640x480", "-framerate", "30", "-i", "video.fifo",
                "-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac",
                "-r", "30", "-f", "mp4", "-movflags", "+faststart", "out.mp4",
            ])
        );
    }

    #[test]
    fn audio_input_precedes_video() {
        let args = EncoderCommandBuilder::new("out.mp4")
            .with_input(Vec::new(), "first")
            .with_input(Vec::new(), "second")
            .build();
        let first = args.iter().position(|a| a == "first").unwrap();
        let second = args.iter().position(|a| a == "second").unwrap();
        assert!(first < second);
        assert_eq!(args[first - 1], "-i");
    }

    #[test]
    fn config_controls_codecs_and_flags() {
        let config = EncoderConfig {
            video_codec: "h264_nvenc".into(),
            overwrite: false,
            fast_start: false,
            ..Default::default()
        };
        let args = EncoderCommandBuilder::from_config(&config, "clip.mp4").build();

        assert!(args.contains(&"-n".to_string()));
        assert!(!args.contains(&"-y".to_string()));
        assert!(!args.contains(&"+faststart".to_string()));
        let codec = args.iter().position(|a| a == "-c:v").unwrap();
        assert_eq!(args[codec + 1], "h264_nvenc");
        assert_eq!(args.last().unwrap(), "clip.mp4");
    }

    #[test]
    fn custom_codecs() {
        let args = EncoderCommandBuilder::new("o.mp4")
            .with_video_codec("h264_qsv")
            .with_audio_codec("libfdk_aac")
            .build();
        let video = args.iter().position(|a| a == "-c:v").unwrap();
        let audio = args.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(args[video + 1], "h264_qsv");
        assert_eq!(args[audio + 1], "libfdk_aac");
    }
}
