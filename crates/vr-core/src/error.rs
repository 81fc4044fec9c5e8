//! Unified error type for vidrelay.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for HTTP handlers to derive a status code via [`Error::http_status`].

use std::fmt;
use std::path::PathBuf;

/// Unified error type covering serving and supervision failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "stream", "task").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A stream name is unknown or its backing file is missing.
    #[error("stream not found: {name}")]
    StreamNotFound {
        /// The requested logical name.
        name: String,
        /// Names that currently resolve, for the error payload.
        available: Vec<String>,
    },

    /// The `Range` header does not have the `bytes=N-[M]` shape.
    #[error("malformed range: {value}")]
    MalformedRange {
        /// The raw header value.
        value: String,
        /// Current size of the resource.
        size: u64,
    },

    /// The requested range starts at or beyond the end of the resource.
    #[error("range start {start} out of bounds for size {size}")]
    RangeOutOfBounds {
        /// Requested first byte.
        start: u64,
        /// Current size of the resource.
        size: u64,
    },

    /// A stream cannot be started because a precondition does not hold.
    #[error("precheck failed for {stream}: {reason}")]
    PrecheckFailed {
        /// Stream identifier.
        stream: String,
        /// Human-readable reason.
        reason: String,
    },

    /// The relay binary does not exist at its configured location.
    #[error("relay binary not found: {}", path.display())]
    BinaryNotFound {
        /// Configured binary path.
        path: PathBuf,
    },

    /// A subprocess exited during its startup grace period.
    #[error("{process} failed to start: {message}")]
    StartupFailed {
        /// Label of the process ("relay", "transcoder:video1", ...).
        process: String,
        /// Human-readable error description.
        message: String,
    },

    /// The relay is not reachable and may not be launched by us.
    #[error("relay unavailable on port {port}")]
    RelayUnavailable {
        /// Port that was probed.
        port: u16,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ...) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } | Error::StreamNotFound { .. } => 404,
            Error::MalformedRange { .. } | Error::RangeOutOfBounds { .. } => 416,
            Error::PrecheckFailed { .. } => 422,
            Error::BinaryNotFound { .. } | Error::RelayUnavailable { .. } => 503,
            Error::StartupFailed { .. } | Error::Tool { .. } => 502,
            Error::Validation(_) => 400,
            Error::Io { .. } | Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } | Error::StreamNotFound { .. } => "not_found",
            Error::MalformedRange { .. } => "malformed_range",
            Error::RangeOutOfBounds { .. } => "range_out_of_bounds",
            Error::PrecheckFailed { .. } => "precheck_failed",
            Error::BinaryNotFound { .. } => "binary_not_found",
            Error::StartupFailed { .. } => "startup_failed",
            Error::RelayUnavailable { .. } => "relay_unavailable",
            Error::Validation(_) => "validation_error",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
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

    /// Convenience constructor for [`Error::PrecheckFailed`].
    pub fn precheck(stream: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::PrecheckFailed {
            stream: stream.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`Error::StartupFailed`].
    pub fn startup(process: impl Into<String>, message: impl Into<String>) -> Self {
        Error::StartupFailed {
            process: process.into(),
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

    /// Size of the resource for range errors, used for `Content-Range: bytes */size`.
    pub fn range_size(&self) -> Option<u64> {
        match self {
            Error::MalformedRange { size, .. } | Error::RangeOutOfBounds { size, .. } => {
                Some(*size)
            }
            _ => None,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
