//! Wiring of configuration into a running gateway.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use msgate_core::{GatewayConfig, Result};
use msgate_session::{
    BootstrapScanner, CredentialStore, FileCredentialStore, Gateway, MirroredCredentialStore,
    ReconnectPolicy, SessionRegistry, SimulatedTransport, Supervisor, TransportFactory,
};

use crate::http::AppState;

/// Everything the binary needs to serve requests.
#[derive(Debug, Clone)]
pub struct App {
    /// Facade used by the HTTP layer
    pub gateway: Gateway,

    /// Startup scan, when enabled
    pub bootstrap: Option<BootstrapScanner>,
}

impl App {
    /// Build the credential store described by `config`.
    ///
    /// With a backup directory configured, writes are mirrored there and a
    /// primary miss is restored from it.
    pub fn credential_store(config: &GatewayConfig) -> Arc<dyn CredentialStore> {
        let primary: Arc<dyn CredentialStore> =
            Arc::new(FileCredentialStore::new(&config.storage.base_dir));
        match &config.storage.backup_dir {
            Some(backup_dir) => {
                info!(
                    "Mirroring credentials from {} to {}",
                    config.storage.base_dir.display(),
                    backup_dir.display()
                );
                let backup = Arc::new(FileCredentialStore::new(backup_dir));
                Arc::new(MirroredCredentialStore::new(primary, backup))
            }
            None => primary,
        }
    }

    /// Build the transport described by `config`.
    pub fn transport(config: &GatewayConfig) -> Arc<dyn TransportFactory> {
        let buffer = config.transport.event_buffer;
        let transport = match config.transport.simulated_auto_pair_ms {
            0 => SimulatedTransport::new(buffer),
            ms => SimulatedTransport::with_auto_pairing(buffer, Duration::from_millis(ms)),
        };
        Arc::new(transport)
    }

    /// Assemble the app from a validated config and injected collaborators.
    pub fn with_parts(
        config: &GatewayConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn TransportFactory>,
    ) -> Self {
        let supervisor = Supervisor::new(
            Arc::new(SessionRegistry::new()),
            store,
            transport,
            ReconnectPolicy::from(&config.reconnect),
        );
        let bootstrap = config
            .bootstrap
            .enabled
            .then(|| BootstrapScanner::new(supervisor.clone(), &config.bootstrap));

        Self {
            gateway: Gateway::new(supervisor, &config.pairing),
            bootstrap,
        }
    }

    /// Assemble the app from `config` alone.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_parts(
            config,
            Self::credential_store(config),
            Self::transport(config),
        ))
    }

    /// Router state for the HTTP layer.
    pub fn state(&self) -> AppState {
        AppState::new(self.gateway.clone())
    }

    /// The supervisor behind the gateway.
    pub fn supervisor(&self) -> &Supervisor {
        self.gateway.supervisor()
    }
}
