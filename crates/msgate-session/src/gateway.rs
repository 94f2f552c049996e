//! Caller-facing operations over the supervisor.
//!
//! Every operation takes the raw session id as received from the outside
//! and validates it first; an invalid id never reaches the registry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use msgate_core::{Error, MessageId, PairingSettings, Result, SessionId, SessionStatus};

use crate::record::SessionSnapshot;
use crate::supervisor::Supervisor;

/// Status of a session as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// The id has never been supervised (or was cleared)
    NotInitialized(SessionId),
    /// The id is supervised
    Session(SessionSnapshot),
}

impl StatusReport {
    /// Session id the report is about.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::NotInitialized(id) => id,
            Self::Session(snapshot) => &snapshot.session_id,
        }
    }

    /// Status label: a [`SessionStatus`] name or `"not_initialized"`.
    pub fn status_str(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "not_initialized",
            Self::Session(snapshot) => snapshot.status.as_str(),
        }
    }

    /// Whether the session can send messages.
    pub fn connected(&self) -> bool {
        matches!(self, Self::Session(s) if s.is_connected())
    }

    /// Remote identity, if connected.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Session(snapshot) => snapshot.identity.as_deref(),
            Self::NotInitialized(_) => None,
        }
    }

    /// Whether a pairing code is waiting to be scanned.
    pub fn pairing_available(&self) -> bool {
        matches!(self, Self::Session(s) if s.pairing_available())
    }

    /// When the status last changed.
    pub fn last_transition_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Session(snapshot) => Some(snapshot.last_transition_at),
            Self::NotInitialized(_) => None,
        }
    }

    /// Whether a reconnection is scheduled.
    pub fn retry_pending(&self) -> bool {
        matches!(self, Self::Session(s) if s.retry_pending())
    }

    /// Connect attempts since the last successful connection.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Session(snapshot) => snapshot.attempts,
            Self::NotInitialized(_) => 0,
        }
    }
}

/// Acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReceipt {
    /// Id assigned by the transport
    pub message_id: MessageId,
    /// Sending session
    pub session_id: SessionId,
    /// When the transport accepted the message
    pub sent_at: DateTime<Utc>,
}

/// Facade used by the HTTP layer (or any other adapter).
#[derive(Debug, Clone)]
pub struct Gateway {
    supervisor: Supervisor,
    pairing_wait: Duration,
    poll_interval: Duration,
}

impl Gateway {
    /// Create a facade over `supervisor`.
    pub fn new(supervisor: Supervisor, pairing: &PairingSettings) -> Self {
        Self {
            supervisor,
            pairing_wait: Duration::from_millis(pairing.wait_ms),
            poll_interval: Duration::from_millis(pairing.poll_interval_ms.max(1)),
        }
    }

    /// The supervisor behind this facade.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Report the status of `raw_id` without creating or connecting anything.
    pub async fn get_status(&self, raw_id: &str) -> Result<StatusReport> {
        let id = SessionId::parse(raw_id)?;
        Ok(match self.supervisor.registry().get(&id).await {
            Some(snapshot) => StatusReport::Session(snapshot),
            None => StatusReport::NotInitialized(id),
        })
    }

    /// Get the pending pairing code of `raw_id`.
    ///
    /// Starts supervising the session if it has no record yet. While the
    /// session is still `connecting`, polls for up to the configured wait.
    pub async fn get_pairing_code(&self, raw_id: &str) -> Result<String> {
        let id = SessionId::parse(raw_id)?;
        if !self.supervisor.registry().contains(&id).await {
            info!("Pairing code requested for unknown session {}, connecting", id);
            self.supervisor.request_connect(&id).await?;
        }

        let deadline = Instant::now() + self.pairing_wait;
        loop {
            let snapshot = self
                .supervisor
                .registry()
                .get(&id)
                .await
                .ok_or_else(|| Error::SessionTerminated(id.clone()))?;

            if let Some(code) = snapshot.pairing_code {
                return Ok(code);
            }
            if snapshot.status != SessionStatus::Connecting || Instant::now() >= deadline {
                debug!(
                    "No pairing code for session {} (status {})",
                    id,
                    snapshot.status.as_str()
                );
                return Err(Error::PairingUnavailable(id));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Send a text message through the live connection of `raw_id`.
    pub async fn send_message(
        &self,
        raw_id: &str,
        recipient: &str,
        body: &str,
    ) -> Result<MessageReceipt> {
        let id = SessionId::parse(raw_id)?;
        if recipient.trim().is_empty() {
            return Err(Error::InvalidInput("recipient must not be empty".to_string()));
        }
        if body.trim().is_empty() {
            return Err(Error::InvalidInput("body must not be empty".to_string()));
        }

        let entry = self
            .supervisor
            .registry()
            .entry(&id)
            .await
            .ok_or_else(|| Error::NotInitialized(id.clone()))?;

        // Send outside the lock so a slow network never blocks lifecycle events
        let client = {
            let record = entry.lock().await;
            if record.status() != SessionStatus::Connected {
                return Err(Error::NotConnected(id));
            }
            record.client().ok_or_else(|| Error::NotConnected(id.clone()))?
        };

        let message_id = client
            .send_text(recipient, body)
            .await
            .map_err(|e| match e {
                Error::TransportFailure { .. } => e,
                other => Error::transport(&id, other),
            })?;

        debug!("Session {} sent message {}", id, message_id);
        Ok(MessageReceipt {
            message_id,
            session_id: id,
            sent_at: Utc::now(),
        })
    }

    /// Tear down and re-establish the connection of `raw_id`.
    pub async fn reconnect(&self, raw_id: &str) -> Result<()> {
        let id = SessionId::parse(raw_id)?;
        self.supervisor.request_reconnect(&id).await
    }

    /// Stop supervising `raw_id` and delete its credentials.
    pub async fn clear_session(&self, raw_id: &str) -> Result<()> {
        let id = SessionId::parse(raw_id)?;
        self.supervisor.request_clear(&id).await
    }

    /// Snapshots of every supervised session, ordered by id.
    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.supervisor.registry().list().await
    }
}
