//! Error types for forge-studio.

use forge_core::{SessionError, VersionId};
use thiserror::Error;

/// Result type alias for forge-studio operations.
pub type Result<T> = std::result::Result<T, StudioError>;

/// Errors from the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    /// The backend could not be reached or did not answer in time.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend answered with a non-success HTTP status.
    #[error("backend returned HTTP {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The backend answered but declined to generate an app.
    #[error("generation failed: {0}")]
    Rejected(String),

    /// The response could not be understood.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// The HTTP client could not be constructed.
    #[error("client configuration error: {0}")]
    Client(String),
}

impl GenerateError {
    /// True for failures that may succeed if the request is repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BackendUnavailable(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors that can occur in forge-studio.
#[derive(Debug, Error)]
pub enum StudioError {
    /// Generation failed.
    #[error(transparent)]
    Generate(#[from] GenerateError),

    /// The sandbox session failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// No version with this id exists.
    #[error("unknown version: {0}")]
    UnknownVersion(VersionId),

    /// The prompt was blank.
    #[error("prompt is empty")]
    EmptyPrompt,

    /// Retry was requested with no failed prompt outstanding.
    #[error("no failed prompt to retry")]
    NothingToRetry,

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl StudioError {
    /// True when the user should be offered a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Generate(e) if e.is_retryable())
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Generate(GenerateError::BackendUnavailable(_)) => {
                "Backend service unavailable. Check that the generation service is running and try again.".to_string()
            }
            Self::Generate(GenerateError::Http { status, .. }) if *status >= 500 => {
                format!("The generation service failed (HTTP {status}). Please try again.")
            }
            Self::Generate(GenerateError::Rejected(message)) => {
                format!("Sorry, I couldn't build that: {message}")
            }
            Self::Session(SessionError::Unavailable) => {
                "Live preview is not available in this environment.".to_string()
            }
            other => format!("Sorry, I encountered an error: {other}"),
        }
    }
}
