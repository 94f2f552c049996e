//! Contract with the messaging-network protocol layer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use msgate_core::{Credentials, MessageId, Result, SessionId, TransportEvent};

/// A live connection to the messaging network.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Send a text message to `recipient`.
    async fn send_text(&self, recipient: &str, body: &str) -> Result<MessageId>;

    /// Close the connection. Best-effort: failures are swallowed.
    async fn close(&self);
}

/// A freshly opened connection together with its lifecycle event stream.
pub struct TransportLink {
    /// Connection handle
    pub client: Arc<dyn TransportClient>,

    /// Lifecycle events, in order; the stream ends after `Closed` or when the
    /// transport drops the connection
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

/// Opens connections bound to a session's credentials.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Start connecting `session_id` with `credentials`.
    ///
    /// Returns as soon as the attempt is initiated; pairing and connection
    /// outcomes arrive on the link's event stream.
    async fn connect(&self, session_id: &SessionId, credentials: Credentials)
        -> Result<TransportLink>;
}
