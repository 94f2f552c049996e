//! In-process transport that follows the connection contract without talking
//! to a real network.
//!
//! A fresh session (empty credentials) receives a pairing code as soon as it
//! connects; a session whose credentials carry a paired identity connects
//! immediately. Hooks let callers drive the rest of the lifecycle: complete a
//! pairing, drop a connection with a given reason, make connects fail, and
//! inspect how many handles are live.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use msgate_core::{
    CloseReason, Credentials, Error, MessageId, Result, SessionId, TransportEvent,
};

use crate::transport::{TransportClient, TransportFactory, TransportLink};

/// Credential entry holding the paired identity.
pub const IDENTITY_KEY: &str = "me";

/// Sent messages remembered per session; older ones are forgotten.
pub const SENT_HISTORY: usize = 256;

/// A message accepted by a simulated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Assigned message id
    pub message_id: MessageId,
    /// Recipient as given by the caller
    pub recipient: String,
    /// Message text
    pub body: String,
}

struct LinkSlot {
    open: Arc<AtomicBool>,
    events: mpsc::Sender<TransportEvent>,
}

#[derive(Default)]
struct SimState {
    links: HashMap<SessionId, Vec<LinkSlot>>,
    connects: HashMap<SessionId, usize>,
    pending_failures: HashMap<SessionId, usize>,
    sent: HashMap<SessionId, Vec<SentMessage>>,
}

impl SimState {
    /// Forget the closed links of `session_id`.
    fn prune(&mut self, session_id: &SessionId) {
        if let Some(links) = self.links.get_mut(session_id) {
            links.retain(|link| link.open.load(Ordering::SeqCst));
            if links.is_empty() {
                self.links.remove(session_id);
            }
        }
    }
}

struct SimInner {
    state: Mutex<SimState>,
    event_buffer: usize,
    auto_pair_after: Option<Duration>,
}

/// Simulated transport factory.
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<SimInner>,
}

impl SimulatedTransport {
    /// Create a transport whose event channels hold `event_buffer` events.
    pub fn new(event_buffer: usize) -> Self {
        Self::build(event_buffer, None)
    }

    /// Create a transport that completes every pairing on its own after `delay`.
    pub fn with_auto_pairing(event_buffer: usize, delay: Duration) -> Self {
        Self::build(event_buffer, Some(delay))
    }

    fn build(event_buffer: usize, auto_pair_after: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(SimInner {
                state: Mutex::new(SimState::default()),
                event_buffer: event_buffer.max(1),
                auto_pair_after,
            }),
        }
    }

    /// Deliver `event` on the newest open connection of `session_id`.
    ///
    /// A `Closed` event also marks that connection as closed. Returns false
    /// when there is no open connection or its channel is full.
    pub fn emit(&self, session_id: &SessionId, event: TransportEvent) -> bool {
        self.inner.emit(session_id, event)
    }

    /// Issue a new pairing code on the open connection.
    pub fn refresh_pairing_code(&self, session_id: &SessionId) -> Option<String> {
        let code = new_pairing_code();
        self.emit(session_id, TransportEvent::PairingCode(code.clone()))
            .then_some(code)
    }

    /// Simulate the user scanning the code: persist the identity and connect.
    pub fn complete_pairing(&self, session_id: &SessionId, identity: &str) -> bool {
        self.inner.complete_pairing(session_id, identity)
    }

    /// Close the open connection with `reason`.
    pub fn drop_connection(&self, session_id: &SessionId, reason: CloseReason) -> bool {
        self.emit(session_id, TransportEvent::Closed(reason))
    }

    /// Make the next `count` connect attempts for `session_id` fail.
    pub fn fail_next_connects(&self, session_id: &SessionId, count: usize) {
        let mut state = self.inner.state.lock().unwrap();
        *state.pending_failures.entry(session_id.clone()).or_default() += count;
    }

    /// Number of connections for `session_id` that are still open.
    pub fn live_handles(&self, session_id: &SessionId) -> usize {
        let state = self.inner.state.lock().unwrap();
        state
            .links
            .get(session_id)
            .map(|links| {
                links
                    .iter()
                    .filter(|link| link.open.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Number of connect attempts seen for `session_id`, failed ones included.
    pub fn connect_count(&self, session_id: &SessionId) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.connects.get(session_id).copied().unwrap_or(0)
    }

    /// Messages sent through `session_id`, oldest first, at most
    /// [`SENT_HISTORY`] of them.
    pub fn sent_messages(&self, session_id: &SessionId) -> Vec<SentMessage> {
        let state = self.inner.state.lock().unwrap();
        state.sent.get(session_id).cloned().unwrap_or_default()
    }
}

impl SimInner {
    fn emit(&self, session_id: &SessionId, event: TransportEvent) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(link) = state
            .links
            .get(session_id)
            .and_then(|links| links.iter().rev().find(|l| l.open.load(Ordering::SeqCst)))
        else {
            debug!("No open simulated link for session {}", session_id);
            return false;
        };

        let closing = matches!(event, TransportEvent::Closed(_));
        if closing {
            link.open.store(false, Ordering::SeqCst);
        }
        let delivered = link.events.try_send(event).is_ok();
        // Buffered events stay readable after the sender goes
        if closing {
            state.prune(session_id);
        }
        delivered
    }

    fn complete_pairing(&self, session_id: &SessionId, identity: &str) -> bool {
        let mut credentials = Credentials::empty();
        credentials.insert(IDENTITY_KEY, identity);
        credentials.insert("pairing_completed_at", chrono::Utc::now().to_rfc3339());

        self.emit(session_id, TransportEvent::CredentialsUpdated(credentials))
            && self.emit(
                session_id,
                TransportEvent::Connected {
                    identity: identity.to_string(),
                },
            )
    }
}

#[async_trait]
impl TransportFactory for SimulatedTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Credentials,
    ) -> Result<TransportLink> {
        let (tx, rx) = mpsc::channel(self.inner.event_buffer);
        let open = Arc::new(AtomicBool::new(true));

        {
            let mut state = self.inner.state.lock().unwrap();
            *state.connects.entry(session_id.clone()).or_default() += 1;

            if let Some(remaining) = state.pending_failures.get_mut(session_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::transport(session_id, "simulated connect failure"));
                }
            }

            // Queue the opening event before handing out the receiver
            let first = match credentials.get(IDENTITY_KEY) {
                Some(identity) => TransportEvent::Connected {
                    identity: identity.to_string(),
                },
                None => TransportEvent::PairingCode(new_pairing_code()),
            };
            let _ = tx.try_send(first);

            state.prune(session_id);
            state
                .links
                .entry(session_id.clone())
                .or_default()
                .push(LinkSlot {
                    open: Arc::clone(&open),
                    events: tx,
                });
        }

        if let (Some(delay), None) = (self.inner.auto_pair_after, credentials.get(IDENTITY_KEY)) {
            let inner = Arc::clone(&self.inner);
            let open = Arc::clone(&open);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if open.load(Ordering::SeqCst) {
                    let identity = format!("{session_id}@simulated");
                    info!("Auto-completing pairing for session {}", session_id);
                    inner.complete_pairing(&session_id, &identity);
                }
            });
        }

        debug!("Simulated link opened for session {}", session_id);

        Ok(TransportLink {
            client: Arc::new(SimulatedClient {
                session_id: session_id.clone(),
                open,
                inner: Arc::clone(&self.inner),
            }),
            events: rx,
        })
    }
}

struct SimulatedClient {
    session_id: SessionId,
    open: Arc<AtomicBool>,
    inner: Arc<SimInner>,
}

#[async_trait]
impl TransportClient for SimulatedClient {
    async fn send_text(&self, recipient: &str, body: &str) -> Result<MessageId> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::transport(&self.session_id, "connection closed"));
        }

        let message_id = Uuid::new_v4().simple().to_string().to_uppercase();
        let mut state = self.inner.state.lock().unwrap();
        let sent = state.sent.entry(self.session_id.clone()).or_default();
        sent.push(SentMessage {
            message_id: message_id.clone(),
            recipient: recipient.to_string(),
            body: body.to_string(),
        });
        if sent.len() > SENT_HISTORY {
            let excess = sent.len() - SENT_HISTORY;
            sent.drain(..excess);
        }
        Ok(message_id)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.inner.state.lock().unwrap().prune(&self.session_id);
    }
}

fn new_pairing_code() -> String {
    format!("2@{}", Uuid::new_v4().simple())
}
