//! Error types for forge-runtime.

use thiserror::Error;

/// Result type alias for forge-runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by a sandbox runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The host cannot run sandboxes at all.
    #[error("sandbox runtime unsupported on this host")]
    Unsupported,

    /// Booting the sandbox failed.
    #[error("boot failed: {0}")]
    Boot(String),

    /// Mounting a file tree failed.
    #[error("mount failed: {0}")]
    Mount(String),

    /// A process could not be started inside the sandbox.
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn {
        /// Command line that failed to start
        command: String,
        /// Underlying reason
        reason: String,
    },

    /// Path escapes the sandbox root or is otherwise malformed.
    #[error("invalid sandbox path: {0}")]
    InvalidPath(String),

    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
