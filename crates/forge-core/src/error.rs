//! Error types for forge-core.

use thiserror::Error;

/// Result type alias for forge-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors from acquiring or using the sandbox session.
///
/// Cloneable because one boot outcome is shared by every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The host cannot run a sandbox.
    #[error("sandbox unavailable on this host")]
    Unavailable,

    /// The sandbox failed to boot or mount its initial files.
    #[error("sandbox boot failed: {0}")]
    Boot(String),

    /// Dependency installation failed.
    #[error("dependency install failed: {0}")]
    Install(String),

    /// The dev server could not be started, or exited before listening.
    #[error("dev server failed: {0}")]
    DevServer(String),

    /// Writing into the sandbox filesystem failed.
    #[error("failed to write {path}: {reason}")]
    Write {
        /// Sandbox path being written
        path: String,
        /// Underlying reason
        reason: String,
    },
}

impl SessionError {
    /// True if the session can never recover for the rest of its lifetime.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Install(_) | Self::DevServer(_))
    }
}

/// Errors from a preview frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// No mounted surface is showing the sandbox.
    #[error("no active preview surface")]
    SurfaceNotFound,

    /// Pixel capture failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// Posting a message into the sandboxed page failed.
    #[error("message delivery failed: {0}")]
    Message(String),
}

/// Errors that can occur in forge-core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Session error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}
