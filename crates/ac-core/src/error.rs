//! Unified error type for audioconv.
//!
//! Every crate funnels its failures into [`Error`], which carries enough
//! context for API handlers to derive an HTTP status code via
//! [`Error::http_status`] and for the worker to record a readable failure
//! detail on the task.

use std::fmt;

/// Unified error type covering all failure modes in audioconv.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "task", "file").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation conflicts with the current state of the resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The service is misconfigured (e.g. ffmpeg is not installed).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fetching the source audio failed.
    #[error("Download failed for {url}: {message}")]
    Download {
        /// The URL that was requested.
        url: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The operation was cancelled before it finished.
    #[error("conversion cancelled")]
    Cancelled,

    /// The service cannot accept more work right now.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Config(_) => 500,
            Error::Download { .. } => 502,
            Error::Tool { .. } => 502,
            Error::Timeout(_) => 504,
            Error::Cancelled => 409,
            Error::Unavailable(_) => 503,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::Conflict(_) => "conflict",
            Error::Config(_) => "config_error",
            Error::Download { .. } => "download_error",
            Error::Tool { .. } => "tool_error",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Unavailable(_) => "unavailable",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Download`].
    pub fn download(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Download {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
