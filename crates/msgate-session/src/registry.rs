//! Registry of supervised sessions.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard, RwLock};

use msgate_core::{SessionId, SessionStatus};

use crate::record::{SessionRecord, SessionSnapshot};

/// A registry slot: the session's record behind its own lock.
///
/// The lock serializes every mutation of one session; the registry map is
/// only locked long enough to look entries up or insert/remove them.
/// Readers never take the record lock: every [`RecordGuard`] republishes the
/// record's snapshot when it is released, and readers copy the last one.
#[derive(Debug)]
pub struct SessionEntry {
    id: SessionId,
    record: Mutex<SessionRecord>,
    published: watch::Sender<SessionSnapshot>,
}

impl SessionEntry {
    fn new(id: SessionId) -> Self {
        let record = SessionRecord::new(id.clone());
        let (published, _) = watch::channel(record.snapshot());
        Self {
            record: Mutex::new(record),
            published,
            id,
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Last published snapshot of the record. Never waits on a mutation.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.published.borrow().clone()
    }

    /// Lock the record for mutation.
    pub(crate) async fn lock(&self) -> RecordGuard<'_> {
        RecordGuard {
            record: self.record.lock().await,
            published: &self.published,
        }
    }
}

/// Exclusive access to a [`SessionRecord`].
///
/// Publishes the record's snapshot on drop. Never hold one across a
/// transport call.
pub(crate) struct RecordGuard<'a> {
    record: MutexGuard<'a, SessionRecord>,
    published: &'a watch::Sender<SessionSnapshot>,
}

impl Deref for RecordGuard<'_> {
    type Target = SessionRecord;

    fn deref(&self) -> &SessionRecord {
        &self.record
    }
}

impl DerefMut for RecordGuard<'_> {
    fn deref_mut(&mut self) -> &mut SessionRecord {
        &mut self.record
    }
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        self.published.send_replace(self.record.snapshot());
    }
}

/// Concurrency-safe map from session id to record.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for `id`, creating a `disconnected` one if needed.
    ///
    /// The flag is true when the entry was created by this call.
    pub async fn get_or_create(&self, id: &SessionId) -> (Arc<SessionEntry>, bool) {
        if let Some(entry) = self.entries.read().await.get(id) {
            return (Arc::clone(entry), false);
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(id) {
            return (Arc::clone(entry), false);
        }
        let entry = Arc::new(SessionEntry::new(id.clone()));
        entries.insert(id.clone(), Arc::clone(&entry));
        (entry, true)
    }

    /// Get the entry for `id` without creating one.
    pub async fn entry(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.entries.read().await.get(id).cloned()
    }

    /// Snapshot of `id`, or `None` if the session is not supervised.
    ///
    /// A record being retired by a clear counts as not supervised.
    pub async fn get(&self, id: &SessionId) -> Option<SessionSnapshot> {
        let snapshot = self.entry(id).await?.snapshot();
        (snapshot.status != SessionStatus::Terminated).then_some(snapshot)
    }

    /// Whether `id` has a record.
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Remove `id` unconditionally.
    pub async fn remove(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.entries.write().await.remove(id)
    }

    /// Remove `id` only if it still maps to `entry`.
    ///
    /// Keeps a record created concurrently after `entry` was retired.
    pub async fn remove_entry(&self, id: &SessionId, entry: &Arc<SessionEntry>) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(id) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Snapshots of every live session, ordered by id.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        self.entries()
            .await
            .iter()
            .map(|entry| entry.snapshot())
            .filter(|snapshot| snapshot.status != SessionStatus::Terminated)
            .collect()
    }

    /// All entries, ordered by id.
    pub async fn entries(&self) -> Vec<Arc<SessionEntry>> {
        let mut entries: Vec<Arc<SessionEntry>> =
            self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.id().cmp(b.id()));
        entries
    }

    /// Number of supervised sessions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no session is supervised.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
