//! Turns the configured capture source and encoder tunables into an argv
//! for the `CommandBuilder` trait the supervisor depends on.

use crate::config::{Config, FfmpegConfig, SourceConfig};
use crate::supervisor::CommandBuilder;

/// The concrete ffmpeg-compatible argv builder the coordinator is wired up
/// to by default. The coordinator itself only ever sees the
/// `CommandBuilder` trait object.
pub struct FfmpegCommandBuilder {
    ffmpeg: FfmpegConfig,
    source: SourceConfig,
    output_url: String,
}

impl FfmpegCommandBuilder {
    pub fn new(config: &Config, output_url: impl Into<String>) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            source: config.source.clone(),
            output_url: output_url.into(),
        }
    }

    fn input_args(&self) -> Vec<String> {
        match &self.source {
            SourceConfig::Screen => vec![
                "-f".into(),
                "x11grab".into(),
                "-framerate".into(),
                self.ffmpeg.framerate.to_string(),
                "-i".into(),
                ":0.0".into(),
            ],
            SourceConfig::Window { title, .. } | SourceConfig::WindowBg { title, .. } => vec![
                "-f".into(),
                "x11grab".into(),
                "-framerate".into(),
                self.ffmpeg.framerate.to_string(),
                "-i".into(),
                format!("title={title}"),
            ],
            SourceConfig::WindowRegion {
                title, x, y, width, height, ..
            } => vec![
                "-f".into(),
                "x11grab".into(),
                "-framerate".into(),
                self.ffmpeg.framerate.to_string(),
                "-video_size".into(),
                format!("{width}x{height}"),
                "-i".into(),
                format!("title={title}+{x},{y}"),
            ],
        }
    }
}

impl CommandBuilder for FfmpegCommandBuilder {
    fn build(&self) -> Vec<String> {
        let mut argv = vec!["ffmpeg".to_string(), "-hide_banner".to_string(), "-loglevel".to_string(), "warning".to_string()];
        argv.extend(self.input_args());

        argv.push("-c:v".into());
        argv.push(self.ffmpeg.video_codec.clone());
        argv.push("-b:v".into());
        argv.push(self.ffmpeg.bitrate.clone());
        argv.push("-r".into());
        argv.push(self.ffmpeg.framerate.to_string());

        if let Some(preset) = &self.ffmpeg.preset {
            argv.push("-preset".into());
            argv.push(preset.clone());
        }
        if let Some(tune) = &self.ffmpeg.tune {
            argv.push("-tune".into());
            argv.push(tune.clone());
        }

        match &self.ffmpeg.audio_codec {
            Some(codec) => {
                argv.push("-c:a".into());
                argv.push(codec.clone());
            }
            None => argv.push("-an".into()),
        }

        argv.push("-f".into());
        argv.push("flv".into());
        argv.push(self.output_url.clone());

        argv
    }
}
