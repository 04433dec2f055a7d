//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! sub-configs for the server, external tools, conversion parameters and
//! task retention. Every section defaults sensibly so a completely empty
//! `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub conversion: ConversionConfig,
    pub retention: RetentionConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Load configuration strictly: the file must exist and parse.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if !self.server.public_url.starts_with("http://")
            && !self.server.public_url.starts_with("https://")
        {
            warnings.push(format!(
                "server.public_url '{}' is not an http(s) URL; retrieval links will be unusable",
                self.server.public_url
            ));
        }

        if self.conversion.max_concurrent == 0 {
            warnings.push("conversion.max_concurrent is 0; treating it as 1".into());
        }
        if self.conversion.queue_capacity == 0 {
            warnings.push("conversion.queue_capacity is 0; treating it as 1".into());
        }

        if self.conversion.task_timeout_secs == 0 {
            warnings.push("conversion.task_timeout_secs is 0; every conversion times out".into());
        }
        if self.conversion.download_timeout_secs == 0 {
            warnings.push("conversion.download_timeout_secs is 0; every download times out".into());
        }

        let ext = &self.conversion.extension;
        if ext.is_empty() || ext.contains(['/', '\\', '.']) {
            warnings.push(format!(
                "conversion.extension '{ext}' should be a bare extension such as 'ogg'"
            ));
        }

        if self.retention.max_tasks == 0 {
            warnings.push("retention.max_tasks is 0; every finished task is evicted".into());
        }

        warnings
    }

    /// Reject settings under which no conversion can ever succeed.
    pub fn ensure_usable(&self) -> Result<()> {
        let conversion = &self.conversion;
        if conversion.task_timeout_secs == 0 {
            return Err(Error::Config("conversion.task_timeout_secs must be positive".into()));
        }
        if conversion.download_timeout_secs == 0 {
            return Err(Error::Config(
                "conversion.download_timeout_secs must be positive".into(),
            ));
        }
        let ext = &conversion.extension;
        if ext.is_empty() || ext.contains(['/', '\\', '\0']) || ext == ".." {
            return Err(Error::Config(format!(
                "conversion.extension '{ext}' cannot name a file in the output directory"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL clients use to reach this server; retrieval links are built
    /// from it.
    pub public_url: String,
    /// Directory holding converted output files.
    pub output_dir: PathBuf,
    /// Parent directory for per-task scratch workspaces (system temp dir
    /// when unset).
    pub work_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            public_url: "http://127.0.0.1:8000".into(),
            output_dir: PathBuf::from("converted_files"),
            work_dir: None,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}

/// Fixed transcoding parameters and worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub channels: u32,
    pub sample_rate: u32,
    pub codec: String,
    pub bitrate: String,
    /// Output file extension (also selects the container).
    pub extension: String,
    /// Maximum number of conversions running at once.
    pub max_concurrent: usize,
    /// Number of submitted tasks that may wait for a worker.
    pub queue_capacity: usize,
    pub task_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub max_download_bytes: Option<u64>,
}

impl ConversionConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 24_000,
            codec: "libopus".into(),
            bitrate: "256k".into(),
            extension: "ogg".into(),
            max_concurrent: 4,
            queue_capacity: 64,
            task_timeout_secs: 600,
            download_timeout_secs: 120,
            max_download_bytes: None,
        }
    }
}

/// Eviction policy for finished tasks and their output files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Finished tasks older than this are evicted.
    pub task_ttl_secs: u64,
    /// Upper bound on tracked tasks; the oldest finished ones go first.
    pub max_tasks: usize,
    pub sweep_interval_secs: u64,
    /// Delete the output file of an evicted task.
    pub delete_outputs: bool,
}

impl RetentionConfig {
    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            task_ttl_secs: 24 * 60 * 60,
            max_tasks: 10_000,
            sweep_interval_secs: 300,
            delete_outputs: true,
        }
    }
}
