//! Error types for msgate.

use thiserror::Error;

use crate::SessionId;

/// Main error type for msgate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Empty or malformed session id
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// No record exists for the session
    #[error("Session not initialized: {0}")]
    NotInitialized(SessionId),

    /// Operation needs a live connection
    #[error("Session not connected: {0}")]
    NotConnected(SessionId),

    /// The transport has not issued a pairing code
    #[error("Pairing code not available for session {0}")]
    PairingUnavailable(SessionId),

    /// Session was cleared while the operation was pending
    #[error("Session terminated: {0}")]
    SessionTerminated(SessionId),

    /// Failure reported by the transport layer
    #[error("Transport failure for session {session_id}: {message}")]
    TransportFailure {
        /// Affected session
        session_id: SessionId,
        /// Transport-provided detail
        message: String,
    },

    /// Credential store read/write failure
    #[error("Persistence failure for session {session_id}: {message}")]
    PersistenceFailure {
        /// Affected session
        session_id: SessionId,
        /// Store-provided detail
        message: String,
    },

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a transport failure for `session_id`.
    pub fn transport(session_id: &SessionId, message: impl std::fmt::Display) -> Self {
        Self::TransportFailure {
            session_id: session_id.clone(),
            message: message.to_string(),
        }
    }

    /// Build a persistence failure for `session_id`.
    pub fn persistence(session_id: &SessionId, message: impl std::fmt::Display) -> Self {
        Self::PersistenceFailure {
            session_id: session_id.clone(),
            message: message.to_string(),
        }
    }

    /// Session the error is about, when it has one.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::NotInitialized(id)
            | Self::NotConnected(id)
            | Self::PairingUnavailable(id)
            | Self::SessionTerminated(id) => Some(id),
            Self::TransportFailure { session_id, .. }
            | Self::PersistenceFailure { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    /// Whether the caller caused the error (bad input or wrong session state).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSessionId(_)
                | Self::NotInitialized(_)
                | Self::NotConnected(_)
                | Self::PairingUnavailable(_)
                | Self::SessionTerminated(_)
                | Self::InvalidInput(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
