//! Error types for the ACP session client

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified reason a session entered the `error` status
///
/// The classification drives what the UI offers: `NoSupport` and
/// `Unavailable` get a remediation banner, `MidStream` and `Other` get a
/// reconnect button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider cannot host a chat session at all
    NoSupport,
    /// The agent binary is missing or could not be started
    Unavailable,
    /// The agent failed while a turn was in flight
    MidStream,
    /// Anything else
    Other,
}

impl FailureKind {
    /// Get the wire/display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSupport => "no_support",
            Self::Unavailable => "unavailable",
            Self::MidStream => "mid_stream",
            Self::Other => "other",
        }
    }

    /// Whether an explicit reconnect may be attempted
    pub fn allows_reconnect(&self) -> bool {
        !matches!(self, Self::NoSupport)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the session client
#[derive(Debug, Error)]
pub enum ClientError {
    // === Session errors ===
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session already exists for this conversation
    #[error("Session already exists: {0}")]
    SessionAlreadyExists(String),

    /// Session has been torn down
    #[error("Session is closed: {0}")]
    SessionClosed(String),

    // === Launch errors ===
    /// Unknown provider id
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Provider cannot run as a chat session
    #[error("Provider does not support chat sessions: {0}")]
    NoSupport(String),

    /// Agent binary is not installed or not runnable
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// Agent process started but the handshake failed
    #[error("Agent launch failed: {0}")]
    LaunchFailed(String),

    // === Streaming errors ===
    /// No transport attached
    #[error("Agent not connected")]
    NotConnected,

    /// Agent reported an error during a turn
    #[error("Streaming error: {0}")]
    StreamingError(String),

    /// Agent process exited
    #[error("Agent exited: {0}")]
    AgentExited(String),

    /// Agent did not acknowledge a cancel in time
    #[error("Cancel not acknowledged after {0}ms")]
    CancelTimeout(u64),

    // === State errors ===
    /// Operation not valid in the current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Mode is not in the available set
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// Model is not in the available set
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Config option id or value rejected
    #[error("Invalid config option: {0}")]
    InvalidConfigOption(String),

    // === Persistence ===
    /// Message store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    // === External errors ===
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for the session client
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Classify this error for the session `error` status
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ClientError::NoSupport(_) | ClientError::ProviderNotFound(_) => FailureKind::NoSupport,
            ClientError::AgentUnavailable(_) => FailureKind::Unavailable,
            ClientError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                FailureKind::Unavailable
            }
            ClientError::StreamingError(_)
            | ClientError::AgentExited(_)
            | ClientError::CancelTimeout(_) => FailureKind::MidStream,
            _ => FailureKind::Other,
        }
    }

    /// Check if a user-initiated reconnect may help
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::LaunchFailed(_)
                | ClientError::StreamingError(_)
                | ClientError::AgentExited(_)
                | ClientError::CancelTimeout(_)
                | ClientError::NotConnected
        )
    }

    /// Check if this error was caused by invalid input from the caller
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ClientError::SessionNotFound(_)
                | ClientError::SessionAlreadyExists(_)
                | ClientError::ProviderNotFound(_)
                | ClientError::InvalidMode(_)
                | ClientError::InvalidModel(_)
                | ClientError::InvalidConfigOption(_)
        )
    }

    // === Constructor helpers ===

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        ClientError::Internal(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ClientError::InvalidState(msg.into())
    }

    /// Create a streaming error
    pub fn streaming_error(msg: impl Into<String>) -> Self {
        ClientError::StreamingError(msg.into())
    }

    /// Create an agent unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        ClientError::AgentUnavailable(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        ClientError::Persistence(msg.into())
    }
}
