//! External tool detection and management.
//!
//! The [`ToolRegistry`] discovers and caches the location of the external
//! transcoder and provides lookup methods for the rest of the workspace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &["ffmpeg"];

/// Configuration for a single external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "ffmpeg").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// If the [`ac_core::config::ToolsConfig`] supplies a custom path **and**
    /// that path exists, it is used directly. Otherwise [`which::which`] is
    /// used to locate the tool in `PATH`. Tools that are not found are
    /// silently omitted from the registry.
    pub fn discover(tools_config: &ac_core::config::ToolsConfig) -> Self {
        let mut registry = Self::empty();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(
                        "Configured {name} path {} does not exist; searching PATH",
                        p.display()
                    );
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                registry.insert(name, path);
            }
        }

        registry
    }

    /// A registry with no tools at all.
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register (or replace) a tool at an explicit path.
    pub fn insert(&mut self, name: &str, path: impl Into<PathBuf>) {
        self.tools.insert(
            name.to_string(),
            ToolConfig {
                name: name.to_string(),
                path: path.into(),
            },
        );
    }

    /// Return a reference to the [`ToolConfig`] for the given tool, or an
    /// [`ac_core::Error::Config`] if the tool was not found during discovery.
    pub fn require(&self, name: &str) -> ac_core::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            ac_core::Error::Config(format!(
                "{name} is not installed or not in the system PATH"
            ))
        })
    }

    /// Whether the named tool was discovered.
    pub fn is_available(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(name, &cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(name: &str, path: &Path) -> Option<String> {
    let version_arg = match name {
        "ffmpeg" => "-version",
        _ => "--version",
    };

    let output = std::process::Command::new(path)
        .arg(version_arg)
        .stdin(std::process::Stdio::null())
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
