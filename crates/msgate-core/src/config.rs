//! Configuration types for msgate.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Gateway configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server settings
    pub server: ServerSettings,
    /// Credential storage settings
    pub storage: StorageSettings,
    /// Reconnection policy settings
    pub reconnect: ReconnectSettings,
    /// Startup resumption settings
    pub bootstrap: BootstrapSettings,
    /// Pairing-code settings
    pub pairing: PairingSettings,
    /// Transport settings
    pub transport: TransportSettings,
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatewayConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (`PORT`, `HOST`, `AUTH_BASE_DIR`,
    /// `BACKUP_DIR`, `LOG_LEVEL`) through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a valid port: {port:?}")))?;
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(dir) = lookup("AUTH_BASE_DIR") {
            self.storage.base_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("BACKUP_DIR") {
            self.storage.backup_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.server.log_level = level;
        }
        self.validate()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("server.port must be > 0".to_string()));
        }

        if self.storage.base_dir.as_os_str().is_empty() {
            return Err(Error::Config("storage.base_dir cannot be empty".to_string()));
        }

        if self.storage.backup_dir.as_ref() == Some(&self.storage.base_dir) {
            return Err(Error::Config(
                "storage.backup_dir must differ from storage.base_dir".to_string(),
            ));
        }

        if self.reconnect.short_delay_ms == 0 || self.reconnect.long_delay_ms == 0 {
            return Err(Error::Config("reconnect delays must be > 0".to_string()));
        }

        if self.reconnect.long_delay_ms < self.reconnect.short_delay_ms {
            return Err(Error::Config(
                "reconnect.long_delay_ms must be >= reconnect.short_delay_ms".to_string(),
            ));
        }

        if self.pairing.poll_interval_ms == 0 {
            return Err(Error::Config("pairing.poll_interval_ms must be > 0".to_string()));
        }

        if self.transport.event_buffer == 0 {
            return Err(Error::Config("transport.event_buffer must be > 0".to_string()));
        }

        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Send permissive CORS headers
    pub cors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            cors: true,
        }
    }
}

/// Credential storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding one `auth_info_<id>` entry per session
    pub base_dir: PathBuf,
    /// Optional second directory mirroring every write
    pub backup_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("auth_storage"),
            backup_dir: None,
        }
    }
}

/// Reconnection policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay after an ordinary transient close
    pub short_delay_ms: u64,
    /// Delay after a conflict or restart-required close
    pub long_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            short_delay_ms: 5_000,
            long_delay_ms: 30_000,
        }
    }
}

impl ReconnectSettings {
    /// Short delay as a `Duration`.
    pub fn short_delay(&self) -> Duration {
        Duration::from_millis(self.short_delay_ms)
    }

    /// Long delay as a `Duration`.
    pub fn long_delay(&self) -> Duration {
        Duration::from_millis(self.long_delay_ms)
    }
}

/// Startup resumption settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    /// Resume persisted sessions on startup
    pub enabled: bool,
    /// Wait before the first resumption
    pub initial_delay_ms: u64,
    /// Spacing between consecutive resumptions
    pub stagger_ms: u64,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 2_000,
            stagger_ms: 1_500,
        }
    }
}

/// Pairing-code settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingSettings {
    /// How long a pairing-code request waits for the transport to issue one
    pub wait_ms: u64,
    /// Polling interval while waiting
    pub poll_interval_ms: u64,
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            wait_ms: 2_500,
            poll_interval_ms: 100,
        }
    }
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Capacity of each connection's event channel
    pub event_buffer: usize,
    /// Simulated transport only: complete pairing on its own after this many ms (0 = never)
    pub simulated_auto_pair_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            event_buffer: 32,
            simulated_auto_pair_ms: 0,
        }
    }
}
