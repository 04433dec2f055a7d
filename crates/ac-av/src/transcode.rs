//! Audio transcoding via ffmpeg.

use std::path::Path;
use std::time::Duration;

use ac_core::config::ConversionConfig;

use crate::command::{ToolCommand, ToolOutput};
use crate::tools::ToolRegistry;

/// Fixed encoder settings applied to every conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTarget {
    pub channels: u32,
    pub sample_rate: u32,
    /// ffmpeg encoder name (e.g. `libopus`).
    pub codec: String,
    /// ffmpeg bitrate string (e.g. `256k`).
    pub bitrate: String,
    /// Output extension; ffmpeg picks the container from it.
    pub extension: String,
}

impl AudioTarget {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            channels: config.channels,
            sample_rate: config.sample_rate,
            codec: config.codec.clone(),
            bitrate: config.bitrate.clone(),
            extension: config.extension.clone(),
        }
    }

    /// Build the ffmpeg argument list for `input` → `output`.
    pub fn ffmpeg_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into(), "-i".into()];
        args.push(input.to_string_lossy().into_owned());
        args.extend([
            "-ac".to_string(),
            self.channels.to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-c:a".to_string(),
            self.codec.clone(),
            "-b:a".to_string(),
            self.bitrate.clone(),
        ]);
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

impl Default for AudioTarget {
    fn default() -> Self {
        Self::from_config(&ConversionConfig::default())
    }
}

/// Transcode `input` into `output` with the given target settings.
///
/// # Errors
///
/// - [`ac_core::Error::Config`] if ffmpeg is not in the registry.
/// - [`ac_core::Error::Tool`] if ffmpeg fails (message carries its stderr).
/// - [`ac_core::Error::Timeout`] if ffmpeg runs longer than `timeout`.
pub async fn transcode_audio(
    tools: &ToolRegistry,
    input: &Path,
    output: &Path,
    target: &AudioTarget,
    timeout: Duration,
) -> ac_core::Result<ToolOutput> {
    let ffmpeg = tools.require("ffmpeg")?;

    tracing::info!(
        codec = %target.codec,
        bitrate = %target.bitrate,
        sample_rate = target.sample_rate,
        channels = target.channels,
        "Transcoding {:?} -> {:?}",
        input,
        output
    );

    let mut cmd = ToolCommand::new(ffmpeg.path.clone());
    cmd.args(target.ffmpeg_args(input, output));
    cmd.timeout(timeout);
    cmd.execute().await
}
