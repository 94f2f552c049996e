//! Per-session state owned by the supervisor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use msgate_core::{CloseReason, SessionId, SessionStatus};

use crate::transport::TransportClient;

/// The live connection of a session and the task pumping its events.
pub(crate) struct LiveConnection {
    pub(crate) client: Arc<dyn TransportClient>,
    pub(crate) event_task: JoinHandle<()>,
}

/// A scheduled reconnection.
pub(crate) struct RetryHandle {
    pub(crate) token: u64,
    pub(crate) task: JoinHandle<()>,
    pub(crate) due_at: DateTime<Utc>,
}

impl RetryHandle {
    pub(crate) fn new(token: u64, task: JoinHandle<()>, delay: Duration) -> Self {
        let due_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            token,
            task,
            due_at,
        }
    }
}

/// Mutable state of one session.
///
/// Only the supervisor mutates records, always under the session's lock.
/// Everyone else sees [`SessionSnapshot`]s.
pub struct SessionRecord {
    id: SessionId,
    status: SessionStatus,
    pub(crate) connection: Option<LiveConnection>,
    pairing_code: Option<String>,
    identity: Option<String>,
    created_at: DateTime<Utc>,
    last_transition_at: DateTime<Utc>,
    pub(crate) retry: Option<RetryHandle>,
    pub(crate) generation: u64,
    pub(crate) attempts: u32,
    pub(crate) last_close: Option<CloseReason>,
}

impl SessionRecord {
    /// Fresh record in the `disconnected` state.
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: SessionStatus::Disconnected,
            connection: None,
            pairing_code: None,
            identity: None,
            created_at: now,
            last_transition_at: now,
            retry: None,
            generation: 0,
            attempts: 0,
            last_close: None,
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Leaving `awaiting_pairing` drops the pairing code and leaving
    /// `connected` drops the identity. Returns whether the status changed.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        let current = self.status;
        if current == next && next != SessionStatus::AwaitingPairing {
            return false;
        }
        if !current.can_transition_to(next) {
            warn!(
                "Rejected status change: id={}, {:?} → {:?}",
                self.id, current, next
            );
            return false;
        }

        if next != SessionStatus::AwaitingPairing {
            self.pairing_code = None;
        }
        if next != SessionStatus::Connected {
            self.identity = None;
        }

        self.status = next;
        self.last_transition_at = Utc::now();
        info!(
            "Session status changed: id={}, {:?} → {:?}",
            self.id, current, next
        );
        true
    }

    /// Record a new pairing code, superseding any earlier one.
    pub fn set_pairing_code(&mut self, code: String) -> bool {
        if !self.transition(SessionStatus::AwaitingPairing) {
            return false;
        }
        self.pairing_code = Some(code);
        true
    }

    /// Record a successful authentication as `identity`.
    pub fn set_connected(&mut self, identity: String) -> bool {
        if !self.transition(SessionStatus::Connected) {
            return false;
        }
        self.identity = Some(identity);
        self.attempts = 0;
        self.last_close = None;
        true
    }

    /// Current pairing code, if the session is waiting for one to be scanned.
    pub fn pairing_code(&self) -> Option<&str> {
        self.pairing_code.as_deref()
    }

    /// Remote identity, if connected.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Handle of the live connection, if any.
    pub fn client(&self) -> Option<Arc<dyn TransportClient>> {
        self.connection.as_ref().map(|c| Arc::clone(&c.client))
    }

    /// Whether a reconnection is scheduled.
    pub fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    /// Abort the scheduled reconnection, if any.
    pub(crate) fn cancel_retry(&mut self) -> bool {
        match self.retry.take() {
            Some(retry) => {
                retry.task.abort();
                true
            }
            None => false,
        }
    }

    /// Read-only copy of the record.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            status: self.status,
            identity: self.identity.clone(),
            pairing_code: self.pairing_code.clone(),
            created_at: self.created_at,
            last_transition_at: self.last_transition_at,
            retry_due_at: self.retry.as_ref().map(|r| r.due_at),
            attempts: self.attempts,
            last_close: self.last_close.clone(),
        }
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("live", &self.connection.is_some())
            .field("retry_pending", &self.retry.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session id
    pub session_id: SessionId,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Remote identity, only while connected
    pub identity: Option<String>,
    /// Pairing code, only while awaiting pairing
    pub pairing_code: Option<String>,
    /// When the supervisor first saw the session
    pub created_at: DateTime<Utc>,
    /// When the status last changed
    pub last_transition_at: DateTime<Utc>,
    /// When the scheduled reconnection fires, if one is pending
    pub retry_due_at: Option<DateTime<Utc>>,
    /// Connect attempts since the last successful connection
    pub attempts: u32,
    /// Reason of the most recent close since the last successful connection
    pub last_close: Option<CloseReason>,
}

impl SessionSnapshot {
    /// Whether the session can send messages.
    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }

    /// Whether a pairing code can be handed out.
    pub fn pairing_available(&self) -> bool {
        self.pairing_code.is_some()
    }

    /// Whether a reconnection is scheduled.
    pub fn retry_pending(&self) -> bool {
        self.retry_due_at.is_some()
    }
}
