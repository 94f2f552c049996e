//! Credential persistence.
//!
//! The supervisor only needs a key-value capability keyed by session id; the
//! format of the stored material is opaque to it. Three backends are
//! provided:
//!
//! - [`FileCredentialStore`]: one `auth_info_<id>` directory per session
//! - [`MemoryCredentialStore`]: in-process map, for tests and ephemeral runs
//! - [`MirroredCredentialStore`]: writes through to a primary and a backup
//!   store, restoring from the backup when the primary has lost an entry

use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use msgate_core::{Credentials, Error, Result, SessionId};

/// Name of the credential file inside a session directory.
const CREDENTIALS_FILE: &str = "creds.json";

/// Durable per-session credential material.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the material for `id`, or `None` if nothing was persisted.
    async fn load(&self, id: &SessionId) -> Result<Option<Credentials>>;

    /// Persist the material for `id`, replacing what was there.
    async fn save(&self, id: &SessionId, credentials: &Credentials) -> Result<()>;

    /// Delete everything stored for `id`. Purging a missing entry succeeds.
    async fn purge(&self, id: &SessionId) -> Result<()>;

    /// Ids for which durable material exists, sorted.
    async fn list_ids(&self) -> Result<Vec<SessionId>>;

    /// Load the material for `id`, creating and persisting an empty set on
    /// first use.
    async fn load_or_init(&self, id: &SessionId) -> Result<Credentials> {
        if let Some(credentials) = self.load(id).await? {
            return Ok(credentials);
        }

        debug!("No credentials for session {}, initializing empty set", id);
        let credentials = Credentials::empty();
        self.save(id, &credentials).await?;
        Ok(credentials)
    }
}

/// Stores each session under `<base_dir>/auth_info_<id>/creds.json`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    base_dir: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at `base_dir`. The directory is created lazily.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root directory of the store.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.base_dir.join(id.credential_key())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Credentials>> {
        let path = self.session_dir(id).join(CREDENTIALS_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::persistence(id, e)),
        };

        let credentials = serde_json::from_str(&content)
            .map_err(|e| Error::persistence(id, format!("corrupt {}: {e}", path.display())))?;
        Ok(Some(credentials))
    }

    async fn save(&self, id: &SessionId, credentials: &Credentials) -> Result<()> {
        let dir = self.session_dir(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::persistence(id, e))?;

        let content = serde_json::to_vec_pretty(credentials)?;
        let tmp = dir.join(format!("{CREDENTIALS_FILE}.tmp"));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Error::persistence(id, e))?;
        tokio::fs::rename(&tmp, dir.join(CREDENTIALS_FILE))
            .await
            .map_err(|e| Error::persistence(id, e))?;

        debug!("Saved {} credential entries for session {}", credentials.len(), id);
        Ok(())
    }

    async fn purge(&self, id: &SessionId) -> Result<()> {
        match tokio::fs::remove_dir_all(self.session_dir(id)).await {
            Ok(()) => {
                info!("Purged credentials for session {}", id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::persistence(id, e)),
        }
    }

    async fn list_ids(&self) -> Result<Vec<SessionId>> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(SessionId::from_credential_key) else {
                debug!("Ignoring foreign entry in credential store: {:?}", name);
                continue;
            };
            if tokio::fs::try_exists(entry.path().join(CREDENTIALS_FILE)).await? {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Keeps credentials in memory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<SessionId, Credentials>>,
    fail_writes: AtomicBool,
    failing_loads: AtomicUsize,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save and purge fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` loads fail.
    pub fn fail_next_loads(&self, count: usize) {
        self.failing_loads.fetch_add(count, Ordering::SeqCst);
    }

    /// Whether an entry exists for `id`.
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    fn check_writable(&self, id: &SessionId) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::persistence(id, "store is read-only"));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Credentials>> {
        let fail = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::persistence(id, "store is unreadable"));
        }
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn save(&self, id: &SessionId, credentials: &Credentials) -> Result<()> {
        self.check_writable(id)?;
        self.entries
            .write()
            .await
            .insert(id.clone(), credentials.clone());
        Ok(())
    }

    async fn purge(&self, id: &SessionId) -> Result<()> {
        self.check_writable(id)?;
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<SessionId>> {
        let mut ids: Vec<SessionId> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Writes through to a primary store and mirrors into a backup store.
///
/// Backup failures are logged and never fail the caller. When the primary
/// has no entry, the backup copy is restored into the primary.
#[derive(Clone)]
pub struct MirroredCredentialStore {
    primary: Arc<dyn CredentialStore>,
    backup: Arc<dyn CredentialStore>,
}

impl MirroredCredentialStore {
    /// Mirror `primary` into `backup`.
    pub fn new(primary: Arc<dyn CredentialStore>, backup: Arc<dyn CredentialStore>) -> Self {
        Self { primary, backup }
    }
}

#[async_trait]
impl CredentialStore for MirroredCredentialStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Credentials>> {
        if let Some(credentials) = self.primary.load(id).await? {
            return Ok(Some(credentials));
        }

        match self.backup.load(id).await {
            Ok(Some(credentials)) => {
                info!("Restoring credentials for session {} from backup", id);
                self.primary.save(id, &credentials).await?;
                Ok(Some(credentials))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("Backup lookup failed for session {}: {}", id, e);
                Ok(None)
            }
        }
    }

    async fn save(&self, id: &SessionId, credentials: &Credentials) -> Result<()> {
        self.primary.save(id, credentials).await?;
        if let Err(e) = self.backup.save(id, credentials).await {
            warn!("Backup save failed for session {}: {}", id, e);
        }
        Ok(())
    }

    async fn purge(&self, id: &SessionId) -> Result<()> {
        self.primary.purge(id).await?;
        if let Err(e) = self.backup.purge(id).await {
            warn!("Backup purge failed for session {}: {}", id, e);
        }
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<SessionId>> {
        let mut ids: BTreeSet<SessionId> = self.primary.list_ids().await?.into_iter().collect();
        match self.backup.list_ids().await {
            Ok(backup_ids) => ids.extend(backup_ids),
            Err(e) => warn!("Backup listing failed: {}", e),
        }
        Ok(ids.into_iter().collect())
    }
}
