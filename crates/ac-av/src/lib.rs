//! # ac-av
//!
//! External transcoder management for audioconv.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to ffmpeg.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support and kill-on-drop for running external processes.
//! - **Workspace management** ([`Workspace`]) -- per-task temporary directory
//!   with safe finalization into the output directory.
//! - **Transcoding** ([`transcode_audio`]) -- the fixed-parameter ffmpeg
//!   invocation described by [`AudioTarget`].

pub mod command;
pub mod tools;
pub mod transcode;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcode::{transcode_audio, AudioTarget};
pub use workspace::Workspace;
