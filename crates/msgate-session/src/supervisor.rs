//! Session supervisor: drives each session's lifecycle.
//!
//! The supervisor is the only writer of [`SessionRecord`]s. Every mutation
//! happens under the session's own lock, so one session never waits on
//! another, and the lock is never held across a transport call: a connect
//! attempt claims a fresh generation under the lock, dials without it, and
//! installs the link only if its generation is still current. Each
//! connection gets an event pump task and each scheduled reconnection a
//! timer task; both carry a token (connection generation or retry token)
//! that is checked under the lock before acting, so work left over from a
//! superseded connection or a cancelled retry is ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use msgate_core::{CloseReason, Error, Result, SessionId, SessionStatus, TransportEvent};

use crate::policy::{ReconnectDecision, ReconnectPolicy};
use crate::record::{LiveConnection, RetryHandle, SessionRecord};
use crate::registry::{SessionEntry, SessionRegistry};
use crate::store::CredentialStore;
use crate::transport::{TransportClient, TransportFactory};

/// Drives connect, pairing, reconnection and clearing for every session.
///
/// Cheap to clone; clones share the same registry, store and transport.
#[derive(Clone)]
pub struct Supervisor {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn TransportFactory>,
    policy: ReconnectPolicy,
    tokens: Arc<AtomicU64>,
}

impl Supervisor {
    /// Create a supervisor over an injected registry, store and transport.
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn TransportFactory>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            policy,
            tokens: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The registry this supervisor writes to.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The credential store this supervisor persists to.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// The reconnection policy in force.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start (or restart) the connection of `id`.
    ///
    /// Closes any live connection and cancels any scheduled retry first.
    /// Returns once the attempt is initiated; pairing and connection
    /// outcomes show up in the session's snapshot later. A failed attempt
    /// is reported to the caller and also schedules a short retry.
    pub async fn request_connect(&self, id: &SessionId) -> Result<()> {
        let (entry, created) = self.registry.get_or_create(id).await;
        if created {
            info!("Supervising new session {}", id);
        }
        self.connect(&entry, None).await
    }

    /// Reconnect `id` immediately, keeping its credentials.
    pub async fn request_reconnect(&self, id: &SessionId) -> Result<()> {
        info!("Reconnect requested for session {}", id);
        self.request_connect(id).await
    }

    /// Stop supervising `id` and delete its credentials.
    ///
    /// Cancels any scheduled retry, purges the store and retires the record
    /// while holding its lock, so a connect racing with the clear either
    /// sees the retired record or starts a new one after the purge. Purging
    /// the store is attempted even when no record exists.
    pub async fn request_clear(&self, id: &SessionId) -> Result<()> {
        let Some(entry) = self.registry.entry(id).await else {
            self.store.purge(id).await?;
            info!("Session {} cleared", id);
            return Ok(());
        };

        let mut record = entry.lock().await;
        record.cancel_retry();
        let stale = Self::detach(&mut record);
        let purged = self.store.purge(id).await;
        record.generation = self.next_token();
        record.transition(SessionStatus::Terminated);
        drop(record);

        self.registry.remove_entry(id, &entry).await;
        if let Some(client) = stale {
            client.close().await;
        }
        purged?;
        info!("Session {} cleared", id);
        Ok(())
    }

    /// Close every connection and cancel every retry, keeping credentials.
    pub async fn shutdown(&self) {
        let entries = self.registry.entries().await;
        info!("Shutting down {} session(s)", entries.len());
        for entry in entries {
            let mut record = entry.lock().await;
            record.cancel_retry();
            // Strands any attempt still dialing
            record.generation = self.next_token();
            let stale = Self::detach(&mut record);
            drop(record);
            if let Some(client) = stale {
                client.close().await;
            }
        }
    }

    fn next_token(&self) -> u64 {
        self.tokens.fetch_add(1, Ordering::Relaxed)
    }

    /// Run one connect attempt for `entry`.
    ///
    /// `retry_token` is set when a scheduled retry fires; the attempt is
    /// dropped if that retry has since been replaced or cancelled.
    async fn connect(&self, entry: &Arc<SessionEntry>, retry_token: Option<u64>) -> Result<()> {
        let id = entry.id().clone();

        let mut record = entry.lock().await;
        if record.status().is_terminal() {
            return Err(Error::SessionTerminated(id));
        }
        match retry_token {
            Some(token) => {
                if record.retry.as_ref().map(|retry| retry.token) != Some(token) {
                    debug!("Retry for session {} was superseded", id);
                    return Ok(());
                }
                // Runs on the retry task itself: detach rather than abort
                record.retry.take();
            }
            None => {
                if record.cancel_retry() {
                    debug!("Cancelled pending retry for session {}", id);
                }
            }
        }
        let stale = Self::detach(&mut record);

        let generation = self.next_token();
        record.generation = generation;
        record.attempts += 1;

        // Store access stays under the lock so a concurrent clear cannot
        // purge between our load and a save
        let credentials = match self.store.load_or_init(&id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Failed to load credentials for session {}: {}", id, e);
                self.schedule_retry(&mut record, self.policy.short_delay());
                drop(record);
                if let Some(client) = stale {
                    client.close().await;
                }
                return Err(e);
            }
        };

        record.transition(SessionStatus::Connecting);
        info!(
            "Connecting session {} (attempt {}, {})",
            id,
            record.attempts,
            if credentials.is_empty() {
                "new pairing"
            } else {
                "stored credentials"
            }
        );
        drop(record);

        if let Some(client) = stale {
            client.close().await;
            debug!("Closed previous connection for session {}", id);
        }
        let outcome = self.transport.connect(&id, credentials).await;

        let mut record = entry.lock().await;
        if record.generation != generation {
            let terminated = record.status().is_terminal();
            drop(record);
            if let Ok(link) = outcome {
                link.client.close().await;
            }
            debug!("Connect attempt for session {} was superseded", id);
            return if terminated {
                Err(Error::SessionTerminated(id))
            } else {
                Ok(())
            };
        }

        match outcome {
            Ok(link) => {
                let event_task = self.spawn_event_pump(id, generation, link.events);
                record.connection = Some(LiveConnection {
                    client: link.client,
                    event_task,
                });
                Ok(())
            }
            Err(e) => {
                warn!("Connect attempt failed for session {}: {}", id, e);
                record.transition(SessionStatus::Disconnected);
                self.schedule_retry(&mut record, self.policy.short_delay());
                Err(match e {
                    Error::TransportFailure { .. } => e,
                    other => Error::transport(&id, other),
                })
            }
        }
    }

    /// Take the live connection, if any, and settle in `disconnected`.
    ///
    /// The pump is aborted; the returned client is closed by the caller once
    /// the record lock is released.
    fn detach(record: &mut SessionRecord) -> Option<Arc<dyn TransportClient>> {
        let stale = record.connection.take().map(|connection| {
            connection.event_task.abort();
            connection.client
        });
        record.transition(SessionStatus::Disconnected);
        stale
    }

    fn spawn_event_pump(
        &self,
        id: SessionId,
        generation: u64,
        mut events: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Some(event) => event,
                    None => {
                        TransportEvent::Closed(CloseReason::Other("event stream ended".to_string()))
                    }
                };
                let closed = matches!(event, TransportEvent::Closed(_));
                supervisor.handle_event(&id, generation, event).await;
                if closed {
                    break;
                }
            }
        })
    }

    async fn handle_event(&self, id: &SessionId, generation: u64, event: TransportEvent) {
        let Some(entry) = self.registry.entry(id).await else {
            debug!("Dropping event for unsupervised session {}", id);
            return;
        };
        let mut record = entry.lock().await;
        if record.generation != generation || record.status().is_terminal() {
            debug!("Ignoring stale event for session {}", id);
            return;
        }

        match event {
            TransportEvent::PairingCode(code) => {
                if record.set_pairing_code(code) {
                    info!("Pairing code issued for session {}", id);
                }
            }
            TransportEvent::Connecting => {
                record.transition(SessionStatus::Connecting);
            }
            TransportEvent::Connected { identity } => {
                if record.set_connected(identity) {
                    info!(
                        "Session {} connected as {}",
                        id,
                        record.identity().unwrap_or_default()
                    );
                }
            }
            TransportEvent::CredentialsUpdated(credentials) => {
                match self.store.save(id, &credentials).await {
                    Ok(()) => debug!("Persisted updated credentials for session {}", id),
                    Err(e) => warn!("Failed to persist credentials for session {}: {}", id, e),
                }
            }
            TransportEvent::Closed(reason) => {
                let closed = self.handle_close(&mut record, reason).await;
                drop(record);
                if let Some(client) = closed {
                    client.close().await;
                }
            }
        }
    }

    /// Apply the reconnection policy to a close; returns the client to close.
    async fn handle_close(
        &self,
        record: &mut SessionRecord,
        reason: CloseReason,
    ) -> Option<Arc<dyn TransportClient>> {
        let id = record.id().clone();
        // Runs on the pump task itself: detach rather than abort
        let closed = record.connection.take().map(|connection| {
            drop(connection.event_task);
            connection.client
        });
        record.transition(SessionStatus::Disconnected);

        match self.policy.decide(&reason) {
            ReconnectDecision::Purge => {
                warn!(
                    "Session {} closed ({}), purging credentials; pairing required",
                    id, reason
                );
                record.cancel_retry();
                record.attempts = 0;
                if let Err(e) = self.store.purge(&id).await {
                    error!("Failed to purge credentials for session {}: {}", id, e);
                }
            }
            ReconnectDecision::RetryAfter(delay) => {
                info!(
                    "Session {} closed ({}), reconnecting in {:?}",
                    id, reason, delay
                );
                self.schedule_retry(record, delay);
            }
        }
        record.last_close = Some(reason);
        closed
    }

    /// Schedule a reconnection, replacing any earlier one.
    fn schedule_retry(&self, record: &mut SessionRecord, delay: Duration) {
        record.cancel_retry();

        let token = self.next_token();
        let supervisor = self.clone();
        let id = record.id().clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            supervisor.fire_retry(&id, token).await;
        });
        record.retry = Some(RetryHandle::new(token, task, delay));
    }

    async fn fire_retry(&self, id: &SessionId, token: u64) {
        let Some(entry) = self.registry.entry(id).await else {
            debug!("Retry for cleared session {} dropped", id);
            return;
        };

        info!("Retrying connection for session {}", id);
        // A failed attempt has already scheduled its own follow-up
        if let Err(e) = self.connect(&entry, Some(token)).await {
            warn!("Scheduled reconnect of session {} failed: {}", id, e);
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::simulated::SimulatedTransport;
    use crate::store::MemoryCredentialStore;
    use crate::transport::TransportLink;
    use msgate_core::Credentials;

    /// Memory store that takes `delay` to purge.
    struct SlowPurgeStore {
        inner: Arc<MemoryCredentialStore>,
        delay: Duration,
    }

    #[async_trait]
    impl CredentialStore for SlowPurgeStore {
        async fn load(&self, id: &SessionId) -> Result<Option<Credentials>> {
            self.inner.load(id).await
        }

        async fn save(&self, id: &SessionId, credentials: &Credentials) -> Result<()> {
            self.inner.save(id, credentials).await
        }

        async fn purge(&self, id: &SessionId) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.purge(id).await
        }

        async fn list_ids(&self) -> Result<Vec<SessionId>> {
            self.inner.list_ids().await
        }
    }

    /// Simulated transport that takes `delay` to dial one session.
    struct SlowTransport {
        inner: SimulatedTransport,
        slow: SessionId,
        delay: Duration,
    }

    #[async_trait]
    impl TransportFactory for SlowTransport {
        async fn connect(
            &self,
            session_id: &SessionId,
            credentials: Credentials,
        ) -> Result<TransportLink> {
            if *session_id == self.slow {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.connect(session_id, credentials).await
        }
    }

    fn supervisor_over(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn TransportFactory>,
    ) -> Supervisor {
        Supervisor::new(
            Arc::new(SessionRegistry::new()),
            store,
            transport,
            ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(30)),
        )
    }

    struct Harness {
        supervisor: Supervisor,
        transport: SimulatedTransport,
        store: Arc<MemoryCredentialStore>,
    }

    fn harness() -> Harness {
        let transport = SimulatedTransport::new(16);
        let store = Arc::new(MemoryCredentialStore::new());
        let supervisor = Supervisor::new(
            Arc::new(SessionRegistry::new()),
            store.clone(),
            Arc::new(transport.clone()),
            ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(30)),
        );
        Harness {
            supervisor,
            transport,
            store,
        }
    }

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    /// Let spawned tasks drain their queues.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    async fn status(h: &Harness, id: &SessionId) -> SessionStatus {
        h.supervisor.registry().get(id).await.unwrap().status
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_initializes_credentials_and_awaits_pairing() {
        let h = harness();
        let id = sid("u1");

        h.supervisor.request_connect(&id).await.unwrap();
        assert!(h.store.contains(&id).await);

        settle().await;
        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::AwaitingPairing);
        assert!(snapshot.pairing_code.is_some());
        assert_eq!(snapshot.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_then_connected() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;

        assert!(h.transport.complete_pairing(&id, "1555@net"));
        settle().await;

        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Connected);
        assert_eq!(snapshot.identity.as_deref(), Some("1555@net"));
        assert_eq!(snapshot.pairing_code, None);
        assert_eq!(snapshot.attempts, 0);

        let stored = h.store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.get("me"), Some("1555@net"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connecting_event_leaves_awaiting_pairing() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;

        h.transport.emit(&id, TransportEvent::Connecting);
        settle().await;

        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Connecting);
        assert_eq!(snapshot.pairing_code, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_credentials_resume_without_pairing() {
        let h = harness();
        let id = sid("u1");
        let mut creds = Credentials::empty();
        creds.insert("me", "1555@net");
        h.store.save(&id, &creds).await.unwrap();

        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;

        assert_eq!(status(&h, &id).await, SessionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_purges_without_retry() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;
        h.transport.complete_pairing(&id, "1555@net");
        settle().await;

        h.transport.drop_connection(&id, CloseReason::LoggedOut);
        settle().await;

        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert!(!snapshot.retry_pending());
        assert_eq!(snapshot.last_close, Some(CloseReason::LoggedOut));
        assert!(!h.store.contains(&id).await);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.transport.connect_count(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_close_retries_after_short_delay() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;

        h.transport.drop_connection(&id, CloseReason::ConnectionLost);
        settle().await;
        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert!(snapshot.retry_pending());

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(h.transport.connect_count(&id), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(h.transport.connect_count(&id), 2);
        assert_eq!(status(&h, &id).await, SessionStatus::AwaitingPairing);
        assert_eq!(h.transport.live_handles(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_close_uses_long_delay() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;

        h.transport.drop_connection(&id, CloseReason::Conflict);
        settle().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.transport.connect_count(&id), 1);

        tokio::time::sleep(Duration::from_secs(21)).await;
        settle().await;
        assert_eq!(h.transport.connect_count(&id), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_pending_retry() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;
        h.transport.drop_connection(&id, CloseReason::ConnectionLost);
        settle().await;

        h.supervisor.request_clear(&id).await.unwrap();
        assert!(h.supervisor.registry().get(&id).await.is_none());
        assert!(!h.store.contains(&id).await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert!(h.supervisor.registry().get(&id).await.is_none());
        assert_eq!(h.transport.connect_count(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replaces_pending_retry() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;
        h.transport.drop_connection(&id, CloseReason::ConnectionLost);
        settle().await;

        h.supervisor.request_reconnect(&id).await.unwrap();
        assert!(!h.supervisor.registry().get(&id).await.unwrap().retry_pending());
        assert_eq!(h.transport.connect_count(&id), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(h.transport.connect_count(&id), 2);
        assert_eq!(h.transport.live_handles(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_on_connected_session_reestablishes() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;
        h.transport.complete_pairing(&id, "1555@net");
        settle().await;
        assert_eq!(status(&h, &id).await, SessionStatus::Connected);

        h.supervisor.request_reconnect(&id).await.unwrap();
        settle().await;

        assert_eq!(h.transport.connect_count(&id), 2);
        assert_eq!(h.transport.live_handles(&id), 1);
        assert_eq!(status(&h, &id).await, SessionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_schedules_retry() {
        let h = harness();
        let id = sid("u1");
        h.transport.fail_next_connects(&id, 1);

        let result = h.supervisor.request_connect(&id).await;
        assert!(matches!(result, Err(Error::TransportFailure { .. })));
        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert!(snapshot.retry_pending());

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(h.transport.connect_count(&id), 2);
        assert_eq!(status(&h, &id).await, SessionStatus::AwaitingPairing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_surfaces_and_retries() {
        let h = harness();
        let id = sid("u1");
        h.store.set_fail_writes(true);

        let result = h.supervisor.request_connect(&id).await;
        assert!(matches!(result, Err(Error::PersistenceFailure { .. })));
        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert!(snapshot.retry_pending());
        assert_eq!(h.transport.connect_count(&id), 0);

        h.store.set_fail_writes(false);
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(h.transport.connect_count(&id), 1);
        assert_eq!(status(&h, &id).await, SessionStatus::AwaitingPairing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_credential_load_on_retry_reschedules() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;
        h.transport.complete_pairing(&id, "1555@net");
        settle().await;

        h.store.fail_next_loads(1);
        h.transport.drop_connection(&id, CloseReason::ConnectionLost);
        settle().await;

        // First retry cannot read the credentials
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert!(snapshot.retry_pending());
        assert_eq!(h.transport.connect_count(&id), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(h.transport.connect_count(&id), 2);
        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Connected);
        assert_eq!(snapshot.identity.as_deref(), Some("1555@net"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_connect_does_not_block_other_callers() {
        let transport = SimulatedTransport::new(16);
        let slow_transport = SlowTransport {
            inner: transport.clone(),
            slow: sid("slow"),
            delay: Duration::from_secs(3600),
        };
        let supervisor = supervisor_over(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(slow_transport),
        );
        let slow = sid("slow");
        let registry = Arc::clone(supervisor.registry());

        let dialing = {
            let supervisor = supervisor.clone();
            let slow = slow.clone();
            tokio::spawn(async move { supervisor.request_connect(&slow).await })
        };
        settle().await;

        let limit = Duration::from_secs(5);
        let listed = tokio::time::timeout(limit, registry.list())
            .await
            .expect("list waited on a dialing session");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SessionStatus::Connecting);
        let snapshot = tokio::time::timeout(limit, registry.get(&slow))
            .await
            .expect("status waited on a dialing session")
            .unwrap();
        assert_eq!(snapshot.status, SessionStatus::Connecting);

        tokio::time::timeout(limit, supervisor.request_connect(&sid("fast")))
            .await
            .expect("another tenant waited on a dialing session")
            .unwrap();
        settle().await;
        assert_eq!(
            registry.get(&sid("fast")).await.unwrap().status,
            SessionStatus::AwaitingPairing
        );

        // Clearing while the dial is in flight wins; the late link is closed
        tokio::time::timeout(limit, supervisor.request_clear(&slow))
            .await
            .expect("clear waited on a dialing session")
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        settle().await;

        let result = dialing.await.unwrap();
        assert!(matches!(result, Err(Error::SessionTerminated(_))));
        assert_eq!(transport.connect_count(&slow), 1);
        assert_eq!(transport.live_handles(&slow), 0);
        assert!(registry.get(&slow).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_dial_is_closed() {
        let transport = SimulatedTransport::new(16);
        let slow_transport = SlowTransport {
            inner: transport.clone(),
            slow: sid("u1"),
            delay: Duration::from_secs(10),
        };
        let supervisor = supervisor_over(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(slow_transport),
        );
        let id = sid("u1");

        let first = {
            let supervisor = supervisor.clone();
            let id = id.clone();
            tokio::spawn(async move { supervisor.request_connect(&id).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        let second = {
            let supervisor = supervisor.clone();
            let id = id.clone();
            tokio::spawn(async move { supervisor.request_connect(&id).await })
        };

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        settle().await;

        assert_eq!(transport.connect_count(&id), 2);
        assert_eq!(transport.live_handles(&id), 1);
        let snapshot = supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::AwaitingPairing);
        assert_eq!(snapshot.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_purges_before_retiring_record() {
        let memory = Arc::new(MemoryCredentialStore::new());
        let store = Arc::new(SlowPurgeStore {
            inner: memory.clone(),
            delay: Duration::from_secs(10),
        });
        let transport = SimulatedTransport::new(16);
        let supervisor = supervisor_over(store, Arc::new(transport.clone()));
        let id = sid("u1");
        supervisor.request_connect(&id).await.unwrap();
        settle().await;

        let clearing = {
            let supervisor = supervisor.clone();
            let id = id.clone();
            tokio::spawn(async move { supervisor.request_clear(&id).await })
        };
        settle().await;
        // Still purging: the record is not retired yet
        assert!(supervisor.registry().contains(&id).await);
        assert!(memory.contains(&id).await);

        let racing = {
            let supervisor = supervisor.clone();
            let id = id.clone();
            tokio::spawn(async move { supervisor.request_connect(&id).await })
        };
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        clearing.await.unwrap().unwrap();
        let raced = racing.await.unwrap();
        assert!(matches!(raced, Err(Error::SessionTerminated(_))));
        assert!(!memory.contains(&id).await);
        assert!(supervisor.registry().get(&id).await.is_none());

        // A connect after the clear starts over with fresh credentials
        supervisor.request_connect(&id).await.unwrap();
        assert!(memory.contains(&id).await);
        assert_eq!(supervisor.registry().get(&id).await.unwrap().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_events_are_ignored() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;
        let first_code = h
            .supervisor
            .registry()
            .get(&id)
            .await
            .unwrap()
            .pairing_code;

        // Second attempt supersedes the first; the old link is closed
        h.supervisor.request_reconnect(&id).await.unwrap();
        settle().await;

        let snapshot = h.supervisor.registry().get(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::AwaitingPairing);
        assert_ne!(snapshot.pairing_code, first_code);
        assert_eq!(h.transport.live_handles(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_are_isolated() {
        let h = harness();
        let a = sid("a");
        let b = sid("b");
        h.supervisor.request_connect(&a).await.unwrap();
        h.supervisor.request_connect(&b).await.unwrap();
        settle().await;
        h.transport.complete_pairing(&b, "b@net");
        settle().await;

        h.transport.drop_connection(&a, CloseReason::LoggedOut);
        settle().await;

        assert_eq!(status(&h, &a).await, SessionStatus::Disconnected);
        assert_eq!(status(&h, &b).await, SessionStatus::Connected);
        assert!(h.store.contains(&b).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_everything_and_keeps_credentials() {
        let h = harness();
        let id = sid("u1");
        h.supervisor.request_connect(&id).await.unwrap();
        settle().await;
        h.transport.complete_pairing(&id, "1555@net");
        settle().await;

        h.supervisor.shutdown().await;

        assert_eq!(h.transport.live_handles(&id), 0);
        assert_eq!(status(&h, &id).await, SessionStatus::Disconnected);
        assert!(h.store.contains(&id).await);
    }
}
