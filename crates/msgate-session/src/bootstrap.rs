//! Startup resumption of persisted sessions.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use msgate_core::{BootstrapSettings, Result, SessionId};

use crate::supervisor::Supervisor;

/// Outcome of a bootstrap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Sessions whose connection was started
    pub resumed: Vec<SessionId>,
    /// Sessions already supervised when their turn came
    pub skipped: Vec<SessionId>,
    /// Sessions whose connection could not be started, with the reason
    pub failed: Vec<(SessionId, String)>,
}

/// Resumes every session found in the credential store.
///
/// Connections are started one at a time, the n-th (0-based) no earlier
/// than `initial_delay + n * stagger` after the scan begins.
#[derive(Debug, Clone)]
pub struct BootstrapScanner {
    supervisor: Supervisor,
    initial_delay: Duration,
    stagger: Duration,
}

impl BootstrapScanner {
    /// Create a scanner using the configured delays.
    pub fn new(supervisor: Supervisor, settings: &BootstrapSettings) -> Self {
        Self::with_delays(
            supervisor,
            Duration::from_millis(settings.initial_delay_ms),
            Duration::from_millis(settings.stagger_ms),
        )
    }

    /// Create a scanner with explicit delays.
    pub fn with_delays(supervisor: Supervisor, initial_delay: Duration, stagger: Duration) -> Self {
        Self {
            supervisor,
            initial_delay,
            stagger,
        }
    }

    /// Scan the store and start a connection for every persisted session.
    ///
    /// A failure for one session is logged and recorded; the scan moves on.
    /// Only a failure to enumerate the store aborts the pass.
    pub async fn run(&self) -> Result<BootstrapReport> {
        let start = Instant::now();
        let ids = self.supervisor.store().list_ids().await?;
        info!("Bootstrap found {} persisted session(s)", ids.len());

        let mut report = BootstrapReport::default();
        for (index, id) in ids.into_iter().enumerate() {
            let due = start + self.initial_delay + self.stagger * index as u32;
            tokio::time::sleep_until(due).await;

            if self.supervisor.registry().contains(&id).await {
                info!("Session {} already supervised, skipping", id);
                report.skipped.push(id);
                continue;
            }

            match self.supervisor.request_connect(&id).await {
                Ok(()) => {
                    info!("Resumed session {}", id);
                    report.resumed.push(id);
                }
                Err(e) => {
                    warn!("Failed to resume session {}: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            "Bootstrap complete: {} resumed, {} skipped, {} failed",
            report.resumed.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Run the scan in the background.
    pub fn spawn(self) -> JoinHandle<Result<BootstrapReport>> {
        tokio::spawn(async move { self.run().await })
    }
}
