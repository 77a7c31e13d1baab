//! Error types for splitns

use thiserror::Error;

/// splitns error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external tool could not be started at all
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An external tool ran and reported a failure we don't tolerate
    #[error("{program} {args} failed: {stderr}")]
    Command {
        /// Program that was run
        program: String,
        /// Space-joined arguments
        args: String,
        /// Trimmed standard error output
        stderr: String,
    },

    /// Packet filter operation failed
    #[error("Firewall error: {message}")]
    Firewall {
        /// Error message
        message: String,
    },

    /// Permission denied
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Removal was requested for a resource other tools rely on
    #[error("Refusing to remove shared resource: {resource}")]
    SharedResource {
        /// Resource that was protected
        resource: String,
    },

    /// Profile or report (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Build an [`Error::InvalidConfig`] from anything printable
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Result type alias for splitns operations
pub type Result<T> = std::result::Result<T, Error>;
