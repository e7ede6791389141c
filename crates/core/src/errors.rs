//! Error types for context-dock
//!
//! Failures fall into two groups. Resolution misses and interpolation
//! failures degrade to a logged no-op at the call site; validation,
//! storage and transport failures are surfaced to the immediate caller,
//! which usually turns them into a `{ ok: false, error }` reply.

use thiserror::Error;

/// Result type alias for context-dock operations
pub type Result<T> = std::result::Result<T, DockError>;

/// Main error type for context-dock
#[derive(Debug, Error)]
pub enum DockError {
    /// No site profile or no input element for the current page
    #[error("Nothing to inject into: {0}")]
    ResolutionMiss(String),

    /// A prompt or payload failed required-field checks
    #[error("Validation error: {0}")]
    Validation(String),

    /// Update or usage recording for an id that is not stored
    #[error("Prompt with id \"{0}\" not found.")]
    NotFound(String),

    /// The key-value store or a message port reported a failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The receiving side dropped a request without answering
    #[error("No response for '{0}'")]
    NoResponse(String),

    /// A known message type carried a payload that does not decode
    #[error("Invalid payload for message '{kind}': {reason}")]
    InvalidMessage { kind: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error (catch-all)
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for DockError {
    fn from(err: anyhow::Error) -> Self {
        DockError::Other(format!("{:#}", err))
    }
}

impl From<String> for DockError {
    fn from(err: String) -> Self {
        DockError::Other(err)
    }
}

impl From<&str> for DockError {
    fn from(err: &str) -> Self {
        DockError::Other(err.to_string())
    }
}

impl DockError {
    /// Shorthand for a validation failure
    pub fn validation(reason: impl Into<String>) -> Self {
        DockError::Validation(reason.into())
    }

    /// Get user-friendly error message, suitable for a form error line
    pub fn user_message(&self) -> String {
        match self {
            DockError::Validation(reason) => reason.clone(),
            DockError::ResolutionMiss(what) => {
                format!("ContextDock could not find {} on this page.", what)
            },
            DockError::Transport(msg) => {
                format!("ContextDock is not reachable: {}", msg)
            },
            _ => self.to_string(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            DockError::ResolutionMiss(_) => "resolution",
            DockError::Validation(_) => "validation",
            DockError::NotFound(_) => "not_found",
            DockError::Transport(_) => "transport",
            DockError::NoResponse(_) => "no_response",
            DockError::InvalidMessage { .. } => "message",
            DockError::Config(_) => "config",
            DockError::Serde(_) => "serialization",
            DockError::Io(_) => "io",
            DockError::Other(_) => "other",
        }
    }
}
