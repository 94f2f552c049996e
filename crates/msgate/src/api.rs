//! HTTP request and response bodies.
//!
//! This module defines the JSON types exchanged over the HTTP surface and
//! their conversions from the session layer's reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use msgate_session::{MessageReceipt, SessionSnapshot, StatusReport};

// =============================================================================
// Service
// =============================================================================

/// Response for `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is alive
    pub status: String,
}

/// Response for `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BannerResponse {
    /// Service name
    pub service: String,

    /// Crate version
    pub version: String,

    /// Number of supervised sessions
    pub sessions: usize,
}

// =============================================================================
// Sessions
// =============================================================================

/// Response for `GET /sessions/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Session identifier
    pub session_id: String,

    /// Whether the session can send messages
    pub connected: bool,

    /// Lifecycle status, or `"not_initialized"` for unknown sessions
    pub status: String,

    /// Remote identity while connected
    pub identity: Option<String>,

    /// Whether a pairing code is waiting to be scanned
    pub pairing_available: bool,

    /// When the status last changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_at: Option<DateTime<Utc>>,

    /// Whether a reconnection is scheduled
    pub retry_pending: bool,

    /// Connect attempts since the last successful connection
    pub attempts: u32,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        Self {
            session_id: report.session_id().to_string(),
            connected: report.connected(),
            status: report.status_str().to_string(),
            identity: report.identity().map(str::to_string),
            pairing_available: report.pairing_available(),
            last_transition_at: report.last_transition_at(),
            retry_pending: report.retry_pending(),
            attempts: report.attempts(),
        }
    }
}

/// Response for `GET /sessions/{id}/pairing-code`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingCodeResponse {
    /// Session identifier
    pub session_id: String,

    /// Code to render and scan with the primary device
    pub pairing_code: String,
}

/// Response for `POST /sessions/{id}/reconnect` and `POST /sessions/{id}/clear`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    /// Always true
    pub accepted: bool,

    /// Session the request was accepted for
    pub session_id: String,
}

impl AcceptedResponse {
    /// Acknowledge a request for `session_id`.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            accepted: true,
            session_id: session_id.into(),
        }
    }
}

/// Summary of one session in `GET /sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier
    pub session_id: String,

    /// Lifecycle status
    pub status: String,

    /// Whether the session can send messages
    pub connected: bool,

    /// Remote identity while connected
    pub identity: Option<String>,

    /// Whether a pairing code is waiting to be scanned
    pub pairing_available: bool,

    /// When the gateway started supervising the session
    pub created_at: DateTime<Utc>,

    /// When the status last changed
    pub last_transition_at: DateTime<Utc>,

    /// When the scheduled reconnection fires, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_due_at: Option<DateTime<Utc>>,

    /// Most recent close reason since the last successful connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_close: Option<String>,
}

impl From<SessionSnapshot> for SessionSummary {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id.to_string(),
            status: snapshot.status.as_str().to_string(),
            connected: snapshot.is_connected(),
            pairing_available: snapshot.pairing_available(),
            identity: snapshot.identity,
            created_at: snapshot.created_at,
            last_transition_at: snapshot.last_transition_at,
            retry_due_at: snapshot.retry_due_at,
            last_close: snapshot.last_close.map(|reason| reason.to_string()),
        }
    }
}

/// Response for `GET /sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    /// Supervised sessions, ordered by id
    pub sessions: Vec<SessionSummary>,

    /// Total count
    pub count: usize,
}

// =============================================================================
// Messages
// =============================================================================

/// Request body for `POST /messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Sending session
    pub session_id: String,

    /// Recipient address on the messaging network
    pub recipient: String,

    /// Message text
    pub body: String,
}

/// Response for `POST /messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// Id assigned by the transport
    pub message_id: String,

    /// Sending session
    pub session_id: String,

    /// When the transport accepted the message
    pub sent_at: DateTime<Utc>,
}

impl From<MessageReceipt> for SendMessageResponse {
    fn from(receipt: MessageReceipt) -> Self {
        Self {
            message_id: receipt.message_id,
            session_id: receipt.session_id.to_string(),
            sent_at: receipt.sent_at,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message
    pub error: String,

    /// Session the error relates to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}
