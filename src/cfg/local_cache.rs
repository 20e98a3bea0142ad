use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::HashSet;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::CasConstraint;
use super::CasGuard;
use super::Cfg;
use super::CfgEvent;
use super::RevisionSnapshot;
use crate::metrics::NOTIFICATION_DROPPED_TOTAL;
use crate::Error;
use crate::Result;
use crate::Revision;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    cas: u64,
    revision: Option<Revision>,
}

/// Commit order of two revisions, as defined by the store that issued them.
pub(crate) type RevisionOrder<'a> = &'a dyn Fn(&Revision, &Revision) -> Ordering;

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    // Revision at which a key was last seen deleted; older changes must not resurrect it
    tombstones: HashMap<String, Revision>,
    // Revision of the latest full listing: nothing at or before it is missing from
    // the cache, so tombstones up to it are folded into this single bound
    floor: Option<Revision>,
    subscribers: HashMap<String, Vec<mpsc::Sender<CfgEvent>>>,
    // Shared by all keys so a CAS is never handed out twice, even across delete/recreate
    last_cas: u64,
}

/// Outcome of feeding one remote change into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteApply {
    Updated(u64),
    Deleted,
    /// Change is not newer than the recorded state, or deletes an absent key
    Unchanged,
}

/// What a reconcile pass against a full listing changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Reconciled {
    pub(crate) updated: usize,
    pub(crate) deleted: usize,
}

/// In-memory CAS-versioned key/value map with change subscriptions.
///
/// Entries, their external revisions, the subscriber table and the CAS counter
/// sit behind a single mutex. Subscribers are notified synchronously from the
/// mutating call with `try_send`, so a slow subscriber only loses its own events.
#[derive(Debug, Default)]
pub struct ConfigCache {
    state: Mutex<CacheState>,
}

impl CacheState {
    fn check(
        &self,
        key: &str,
        guard: CasGuard,
    ) -> Result<()> {
        let entry = self.entries.get(key);
        let constraint = match guard {
            CasGuard::ForceOverride => return Ok(()),
            CasGuard::Checked(constraint) => constraint,
        };
        let passed = match constraint {
            CasConstraint::NoConstraint => true,
            CasConstraint::MustMatch(cas) => entry.is_some_and(|e| e.cas == cas),
            CasConstraint::MustNotExist => entry.is_none(),
        };
        if passed {
            Ok(())
        } else {
            Err(Error::CasMismatch {
                key: key.to_string(),
                expected: constraint,
                current: entry.map_or(0, |e| e.cas),
            })
        }
    }

    fn current_cas(
        &self,
        key: &str,
    ) -> u64 {
        self.entries.get(key).map_or(0, |e| e.cas)
    }

    /// Latest revision known for `key`, live or deleted.
    fn known_revision(
        &self,
        key: &str,
    ) -> Option<&Revision> {
        match self.entries.get(key) {
            Some(entry) => entry.revision.as_ref(),
            None => self.tombstones.get(key).or(self.floor.as_ref()),
        }
    }

    fn is_newer(
        &self,
        key: &str,
        revision: &Revision,
        order: RevisionOrder<'_>,
    ) -> bool {
        self.known_revision(key)
            .map_or(true, |known| order(revision, known) == Ordering::Greater)
    }

    fn put(
        &mut self,
        key: &str,
        value: Bytes,
        revision: Option<Revision>,
    ) -> u64 {
        self.last_cas += 1;
        let cas = self.last_cas;
        self.tombstones.remove(key);
        self.entries.insert(key.to_string(), CacheEntry { value, cas, revision });
        self.notify(key);
        cas
    }

    fn remove(
        &mut self,
        key: &str,
    ) -> bool {
        let removed = self.entries.remove(key);
        let existed = removed.is_some();
        if let Some(revision) = removed.and_then(|e| e.revision) {
            self.tombstones.insert(key.to_string(), revision);
        }
        self.notify(key);
        existed
    }

    fn notify(
        &mut self,
        key: &str,
    ) {
        let Some(sinks) = self.subscribers.get_mut(key) else {
            return;
        };
        sinks.retain(|sink| match sink.try_send(CfgEvent { key: key.to_string() }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(key, "subscriber buffer full, dropping event");
                NOTIFICATION_DROPPED_TOTAL.inc();
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(key, "subscriber gone, unregistering");
                false
            }
        });
        if sinks.is_empty() {
            self.subscribers.remove(key);
        }
    }
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        key: &str,
        cas: CasConstraint,
    ) -> Result<(Bytes, u64)> {
        let state = self.state.lock();
        let Some(entry) = state.entries.get(key) else {
            return Err(Error::NotFound { key: key.to_string() });
        };
        state.check(key, cas.into())?;
        Ok((entry.value.clone(), entry.cas))
    }

    /// Stores `value` and returns its freshly assigned CAS.
    ///
    /// Any previously recorded external revision is dropped.
    pub fn set(
        &self,
        key: &str,
        value: Bytes,
        cas: CasConstraint,
    ) -> Result<u64> {
        self.set_with(key, value, cas.into(), None)
    }

    pub(crate) fn set_with(
        &self,
        key: &str,
        value: Bytes,
        guard: CasGuard,
        revision: Option<Revision>,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        state.check(key, guard)?;
        Ok(state.put(key, value, revision))
    }

    pub fn del(
        &self,
        key: &str,
        cas: CasConstraint,
    ) -> Result<()> {
        self.del_with(key, cas.into()).map(|_| ())
    }

    /// Returns whether an entry was removed. Subscribers are notified either way.
    pub(crate) fn del_with(
        &self,
        key: &str,
        guard: CasGuard,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        state.check(key, guard)?;
        Ok(state.remove(key))
    }

    /// Reads the external revision of `key` together with the CAS it belongs to.
    ///
    /// An absent key yields `cas == 0` and no revision.
    pub fn get_revision(
        &self,
        key: &str,
        cas: CasConstraint,
    ) -> Result<RevisionSnapshot> {
        let state = self.state.lock();
        state.check(key, cas.into())?;
        Ok(match state.entries.get(key) {
            Some(entry) => RevisionSnapshot {
                cas: entry.cas,
                revision: entry.revision.clone(),
            },
            None => RevisionSnapshot { cas: 0, revision: None },
        })
    }

    /// Attaches `revision` to the entry if it is still at `cas`.
    pub fn set_revision(
        &self,
        key: &str,
        cas: u64,
        revision: Revision,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check(key, CasConstraint::MustMatch(cas).into())?;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.revision = Some(revision);
        }
        Ok(())
    }

    /// Commits an externally confirmed write.
    ///
    /// When the watch already delivered this write or a later change, the
    /// recorded state wins and its CAS is returned. A key deleted after the
    /// write was confirmed reports a mismatch against `snapshot_cas`.
    pub(crate) fn commit_set(
        &self,
        key: &str,
        value: Bytes,
        revision: Revision,
        snapshot_cas: u64,
        order: RevisionOrder<'_>,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        if state.is_newer(key, &revision, order) {
            return Ok(state.put(key, value, Some(revision)));
        }
        let current = state.current_cas(key);
        if current == 0 {
            return Err(Error::CasMismatch {
                key: key.to_string(),
                expected: CasConstraint::MustMatch(snapshot_cas),
                current,
            });
        }
        trace!(key, snapshot_cas, current, "entry already advanced past write");
        Ok(current)
    }

    /// Commits an externally confirmed delete of the entry read at `snapshot`.
    ///
    /// Without a snapshot revision the delete was unconditional, so a locally
    /// present entry is left for the watch to settle.
    pub(crate) fn commit_del(
        &self,
        key: &str,
        snapshot: &RevisionSnapshot,
        order: RevisionOrder<'_>,
    ) {
        let mut state = self.state.lock();
        let should_remove = match (&snapshot.revision, state.entries.get(key)) {
            (_, None) => true,
            (Some(deleted), Some(entry)) => entry
                .revision
                .as_ref()
                .map_or(true, |current| order(current, deleted) != Ordering::Greater),
            (None, Some(_)) => false,
        };
        if should_remove {
            state.remove(key);
        } else {
            trace!(key, snapshot_cas = snapshot.cas, "entry already advanced past delete");
        }
    }

    /// Applies a change observed in the external store under one lock acquisition.
    ///
    /// Changes not newer than what the cache already knows for the key are
    /// skipped, which covers echoes of our own writes and late deliveries.
    pub(crate) fn apply_remote(
        &self,
        key: &str,
        value: Option<Bytes>,
        revision: Revision,
        order: RevisionOrder<'_>,
    ) -> RemoteApply {
        let mut state = self.state.lock();
        if !state.is_newer(key, &revision, order) {
            return RemoteApply::Unchanged;
        }
        match value {
            None => {
                let existed = state.entries.contains_key(key);
                if existed {
                    state.remove(key);
                }
                state.tombstones.insert(key.to_string(), revision);
                if existed {
                    RemoteApply::Deleted
                } else {
                    RemoteApply::Unchanged
                }
            }
            Some(value) => RemoteApply::Updated(state.put(key, value, Some(revision))),
        }
    }

    /// Brings the cache in line with a full listing taken at store revision `at`.
    ///
    /// Listed children go through the same newer-wins rule as single changes.
    /// Cached keys missing from the listing were deleted unless their revision
    /// is newer than `at`, in which case they were written after the listing.
    pub(crate) fn reconcile(
        &self,
        children: Vec<(String, Bytes, Revision)>,
        at: &Revision,
        order: RevisionOrder<'_>,
    ) -> Reconciled {
        let mut state = self.state.lock();
        let mut outcome = Reconciled::default();

        let mut listed = HashSet::with_capacity(children.len());
        for (key, value, revision) in children {
            if state.is_newer(&key, &revision, order) {
                state.put(&key, value, Some(revision));
                outcome.updated += 1;
            }
            listed.insert(key);
        }

        let missing: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| {
                !listed.contains(key.as_str())
                    && entry
                        .revision
                        .as_ref()
                        .map_or(true, |revision| order(revision, at) != Ordering::Greater)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &missing {
            state.remove(key);
            outcome.deleted += 1;
        }

        let raise = state.floor.as_ref().map_or(true, |floor| order(at, floor) == Ordering::Greater);
        if raise {
            state.tombstones.retain(|_, revision| order(revision, at) == Ordering::Greater);
            state.floor = Some(at.clone());
        }
        outcome
    }

    /// Drops every entry, notifying each key's subscribers.
    pub(crate) fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub fn subscribe(
        &self,
        key: &str,
        sink: mpsc::Sender<CfgEvent>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.subscribers.entry(key.to_string()).or_default().push(sink);
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut keys: Vec<String> = state.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn tombstone_count(&self) -> usize {
        self.state.lock().tombstones.len()
    }

    pub fn subscriber_count(
        &self,
        key: &str,
    ) -> usize {
        self.state.lock().subscribers.get(key).map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl Cfg for ConfigCache {
    fn get(
        &self,
        key: &str,
        cas: CasConstraint,
    ) -> Result<(Bytes, u64)> {
        ConfigCache::get(self, key, cas)
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        cas: CasConstraint,
    ) -> Result<u64> {
        ConfigCache::set(self, key, value, cas)
    }

    async fn del(
        &self,
        key: &str,
        cas: CasConstraint,
    ) -> Result<()> {
        ConfigCache::del(self, key, cas)
    }

    fn subscribe(
        &self,
        key: &str,
        sink: mpsc::Sender<CfgEvent>,
    ) -> Result<()> {
        ConfigCache::subscribe(self, key, sink)
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn on_error(
        &self,
        err: &Error,
    ) {
        error!("config cache error: {:?}", err);
    }

    async fn erase_all(&self) -> Result<()> {
        let erased = self.clear();
        debug!(erased, "erased all cached entries");
        Ok(())
    }
}
