//! Built content waiting to be promoted into the live window.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{ContentKey, ContentRecord, Result, StreamError};

#[derive(Debug, Default)]
struct PendingInner {
    ready: HashMap<ContentKey, ContentRecord>,
    failed: HashSet<ContentKey>,
}

/// Hand-off point between the content worker and the main loop.
///
/// The worker only inserts; the main loop only removes. A single mutex
/// guards both, and every removal happens inside one critical section.
#[derive(Clone, Default)]
pub struct PendingStore {
    shared: Arc<Mutex<PendingInner>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the built record for `key`.
    pub fn put(&self, key: ContentKey, record: ContentRecord) -> Result<()> {
        let mut inner = self.lock()?;
        inner.failed.remove(&key);
        inner.ready.insert(key, record);
        Ok(())
    }

    /// Records that `key` could not be built, so the main loop can stop
    /// tracking it as in flight.
    pub fn record_failure(&self, key: ContentKey) -> Result<()> {
        self.lock()?.failed.insert(key);
        Ok(())
    }

    pub fn take_failures(&self) -> Result<Vec<ContentKey>> {
        let mut inner = self.lock()?;
        Ok(inner.failed.drain().collect())
    }

    /// Atomically removes up to `max_count` entries accepted by `filter`.
    ///
    /// Candidates are taken in ascending forward coordinate (ties broken by
    /// lateral coordinates), so the batch is reproducible for a fixed set of
    /// pending entries.
    pub fn take_ready_batch<F>(&self, max_count: usize, mut filter: F) -> Result<Vec<ContentRecord>>
    where
        F: FnMut(&ContentKey, &ContentRecord) -> bool,
    {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.lock()?;

        let mut keys: Vec<ContentKey> = inner
            .ready
            .iter()
            .filter(|(key, record)| filter(*key, *record))
            .map(|(key, _)| *key)
            .collect();
        keys.sort_by_key(ContentKey::promotion_order);
        keys.truncate(max_count);

        Ok(keys
            .iter()
            .filter_map(|key| inner.ready.remove(key))
            .collect())
    }

    /// Drops entries accepted by `predicate`; returns the removed keys.
    pub fn discard_where<F>(&self, mut predicate: F) -> Result<Vec<ContentKey>>
    where
        F: FnMut(&ContentKey) -> bool,
    {
        let mut inner = self.lock()?;
        let keys: Vec<ContentKey> = inner.ready.keys().copied().filter(|key| predicate(key)).collect();
        for key in &keys {
            inner.ready.remove(key);
        }
        Ok(keys)
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.lock()?.ready.len())
    }

    pub fn contains(&self, key: &ContentKey) -> Result<bool> {
        Ok(self.lock()?.ready.contains_key(key))
    }

    /// Snapshot of every key with a built record waiting.
    pub fn keys(&self) -> Result<HashSet<ContentKey>> {
        Ok(self.lock()?.ready.keys().copied().collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, PendingInner>> {
        self.shared
            .lock()
            .map_err(|_| StreamError::Poisoned("pending store"))
    }
}

impl std::fmt::Debug for PendingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingStore").finish()
    }
}
