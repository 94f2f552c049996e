//! End-to-end session lifecycle tests over the simulated transport.
//!
//! All tests run on tokio's paused clock, so reconnection delays elapse
//! instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use msgate_core::{CloseReason, Credentials, Error, PairingSettings, SessionId, SessionStatus};
use msgate_session::{
    BootstrapScanner, CredentialStore, FileCredentialStore, Gateway, MemoryCredentialStore,
    ReconnectPolicy, SessionRegistry, SimulatedTransport, Supervisor,
};

struct Fixture {
    gateway: Gateway,
    transport: SimulatedTransport,
    store: Arc<dyn CredentialStore>,
}

fn fixture_with_store(store: Arc<dyn CredentialStore>) -> Fixture {
    let transport = SimulatedTransport::new(16);
    let supervisor = Supervisor::new(
        Arc::new(SessionRegistry::new()),
        Arc::clone(&store),
        Arc::new(transport.clone()),
        ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(30)),
    );
    Fixture {
        gateway: Gateway::new(supervisor, &PairingSettings::default()),
        transport,
        store,
    }
}

fn fixture() -> Fixture {
    fixture_with_store(Arc::new(MemoryCredentialStore::new()))
}

fn sid(raw: &str) -> SessionId {
    SessionId::parse(raw).unwrap()
}

/// Give the event pumps a moment to drain.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Pair `raw` and wait until it reports connected.
async fn pair(f: &Fixture, raw: &str, identity: &str) {
    f.gateway.get_pairing_code(raw).await.unwrap();
    assert!(f.transport.complete_pairing(&sid(raw), identity));
    settle().await;
    assert!(f.gateway.get_status(raw).await.unwrap().connected());
}

#[tokio::test(start_paused = true)]
async fn fresh_session_pairs_connects_and_sends() {
    let f = fixture();

    let code = f.gateway.get_pairing_code("u1").await.unwrap();
    assert!(!code.is_empty());
    let report = f.gateway.get_status("u1").await.unwrap();
    assert_eq!(report.status_str(), "awaiting_pairing");
    assert!(report.pairing_available());
    assert!(!report.connected());

    f.transport.complete_pairing(&sid("u1"), "15550001@net");
    settle().await;

    let report = f.gateway.get_status("u1").await.unwrap();
    assert!(report.connected());
    assert_eq!(report.identity(), Some("15550001@net"));
    assert!(!report.pairing_available());

    let receipt = f
        .gateway
        .send_message("u1", "15559999@net", "hello")
        .await
        .unwrap();
    assert!(!receipt.message_id.is_empty());
    assert_eq!(receipt.session_id, sid("u1"));

    let sent = f.transport.sent_messages(&sid("u1"));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message_id, receipt.message_id);
    assert_eq!(sent[0].recipient, "15559999@net");
    assert_eq!(sent[0].body, "hello");
}

#[tokio::test(start_paused = true)]
async fn logged_out_close_purges_credentials_without_retry() {
    let f = fixture();
    pair(&f, "u1", "15550001@net").await;
    assert!(f.store.load(&sid("u1")).await.unwrap().is_some());

    f.transport.drop_connection(&sid("u1"), CloseReason::LoggedOut);
    settle().await;

    let report = f.gateway.get_status("u1").await.unwrap();
    assert_eq!(report.status_str(), "disconnected");
    assert!(!report.retry_pending());
    assert!(f.store.load(&sid("u1")).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(f.transport.connect_count(&sid("u1")), 1);
    assert!(matches!(
        f.gateway.send_message("u1", "r@net", "hi").await,
        Err(Error::NotConnected(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn transient_close_reconnects_after_short_delay() {
    let f = fixture();
    pair(&f, "u1", "15550001@net").await;

    f.transport
        .drop_connection(&sid("u1"), CloseReason::ConnectionLost);
    settle().await;
    let report = f.gateway.get_status("u1").await.unwrap();
    assert_eq!(report.status_str(), "disconnected");
    assert!(report.retry_pending());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(f.transport.connect_count(&sid("u1")), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(f.transport.connect_count(&sid("u1")), 2);

    // Credentials survived the close, so no new pairing is needed
    let report = f.gateway.get_status("u1").await.unwrap();
    assert!(report.connected());
    assert_eq!(report.identity(), Some("15550001@net"));
    assert_eq!(f.transport.live_handles(&sid("u1")), 1);
}

#[tokio::test(start_paused = true)]
async fn restart_required_waits_for_long_delay() {
    let f = fixture();
    pair(&f, "u1", "15550001@net").await;

    f.transport
        .drop_connection(&sid("u1"), CloseReason::RestartRequired);
    settle().await;

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(f.transport.connect_count(&sid("u1")), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(f.transport.connect_count(&sid("u1")), 2);
}

#[tokio::test(start_paused = true)]
async fn clear_during_pending_retry_never_resurrects() {
    let f = fixture();
    pair(&f, "u1", "15550001@net").await;
    f.transport
        .drop_connection(&sid("u1"), CloseReason::ConnectionLost);
    settle().await;

    f.gateway.clear_session("u1").await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    let report = f.gateway.get_status("u1").await.unwrap();
    assert_eq!(report.status_str(), "not_initialized");
    assert_eq!(f.transport.connect_count(&sid("u1")), 1);
    assert_eq!(f.transport.live_handles(&sid("u1")), 0);
    assert!(f.store.load(&sid("u1")).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn clear_of_connected_session_closes_it() {
    let f = fixture();
    pair(&f, "u1", "15550001@net").await;

    f.gateway.clear_session("u1").await.unwrap();

    assert_eq!(f.transport.live_handles(&sid("u1")), 0);
    assert!(f.gateway.list_sessions().await.is_empty());
    assert!(matches!(
        f.gateway.send_message("u1", "r@net", "hi").await,
        Err(Error::NotInitialized(_))
    ));

    // A later pairing request starts from scratch
    let code = f.gateway.get_pairing_code("u1").await.unwrap();
    assert!(!code.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reconnect_of_connected_session_reestablishes() {
    let f = fixture();
    pair(&f, "u1", "15550001@net").await;

    f.gateway.reconnect("u1").await.unwrap();
    settle().await;

    assert_eq!(f.transport.connect_count(&sid("u1")), 2);
    assert_eq!(f.transport.live_handles(&sid("u1")), 1);
    assert!(f.gateway.get_status("u1").await.unwrap().connected());
}

#[tokio::test(start_paused = true)]
async fn status_of_unknown_session_creates_nothing() {
    let f = fixture();

    let report = f.gateway.get_status("nobody").await.unwrap();
    assert_eq!(report.status_str(), "not_initialized");
    assert!(f.gateway.list_sessions().await.is_empty());
    assert_eq!(f.transport.connect_count(&sid("nobody")), 0);
}

#[tokio::test(start_paused = true)]
async fn sessions_do_not_affect_each_other() {
    let f = fixture();
    pair(&f, "alice", "1@net").await;
    pair(&f, "bob", "2@net").await;

    f.transport
        .drop_connection(&sid("alice"), CloseReason::LoggedOut);
    settle().await;

    let bob = f.gateway.get_status("bob").await.unwrap();
    assert!(bob.connected());
    assert!(f.gateway.send_message("bob", "r@net", "still here").await.is_ok());
    assert!(f.store.load(&sid("bob")).await.unwrap().is_some());

    let sessions = f.gateway.list_sessions().await;
    let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["alice", "bob"]);
    assert_eq!(sessions[0].status, SessionStatus::Disconnected);
    assert_eq!(sessions[1].status, SessionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_resumes_persisted_sessions_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(dir.path()));

    let mut paired = Credentials::empty();
    paired.insert("me", "1@net");
    store.save(&sid("paired"), &paired).await.unwrap();
    store
        .save(&sid("unpaired"), &Credentials::empty())
        .await
        .unwrap();

    let f = fixture_with_store(store);
    let report = BootstrapScanner::with_delays(
        f.gateway.supervisor().clone(),
        Duration::from_secs(2),
        Duration::from_millis(1500),
    )
    .run()
    .await
    .unwrap();
    settle().await;

    assert_eq!(report.resumed, vec![sid("paired"), sid("unpaired")]);
    assert!(f.gateway.get_status("paired").await.unwrap().connected());
    assert!(f
        .gateway
        .get_status("unpaired")
        .await
        .unwrap()
        .pairing_available());
}

#[tokio::test(start_paused = true)]
async fn shutdown_keeps_credentials_for_next_start() {
    let f = fixture();
    pair(&f, "u1", "1@net").await;

    f.gateway.supervisor().shutdown().await;

    assert_eq!(f.transport.live_handles(&sid("u1")), 0);
    let stored = f.store.load(&sid("u1")).await.unwrap().unwrap();
    assert_eq!(stored.get("me"), Some("1@net"));
}
