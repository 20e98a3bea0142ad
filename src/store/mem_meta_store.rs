use std::cmp::Ordering;
use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::MetaStore;
use super::Listing;
use super::RemoteChange;
use super::Revision;
use super::WatchEvent;
use crate::StoreError;
use crate::StoreResult;
use crate::DEFAULT_STORE_CHANGE_CAPACITY;

#[derive(Debug, Default)]
struct StoreState {
    // path -> (value, revision)
    entries: BTreeMap<String, (Bytes, u64)>,
    last_revision: u64,
}

impl StoreState {
    fn next_revision(&mut self) -> u64 {
        self.last_revision += 1;
        self.last_revision
    }

    fn children(
        &self,
        prefix: &str,
    ) -> Vec<RemoteChange> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, (value, rev))| RemoteChange {
                path: path.clone(),
                value: Some(value.clone()),
                revision: encode_revision(*rev),
            })
            .collect()
    }

    fn listing(
        &self,
        prefix: &str,
    ) -> Listing {
        Listing {
            children: self.children(prefix),
            revision: encode_revision(self.last_revision),
        }
    }
}

/// In-process strongly consistent metadata store.
///
/// Every mutation takes one lock, draws the next store-wide revision and
/// publishes the change while still holding the lock, so watchers observe
/// changes in commit order.
#[derive(Debug)]
pub struct MemMetaStore {
    state: Mutex<StoreState>,
    changes: broadcast::Sender<RemoteChange>,
    disconnect_epoch: watch::Sender<u64>,
}

impl Default for MemMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemMetaStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STORE_CHANGE_CAPACITY)
    }

    /// `capacity` bounds how far a watcher may fall behind before its stream
    /// breaks and has to be restarted.
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        let (disconnect_epoch, _) = watch::channel(0);
        Self {
            state: Mutex::new(StoreState::default()),
            changes,
            disconnect_epoch,
        }
    }

    /// Unconditional write, as done by a writer that bypasses any cache.
    pub fn put(
        &self,
        path: &str,
        value: impl Into<Bytes>,
    ) -> Revision {
        let mut state = self.state.lock();
        let rev = state.next_revision();
        let value = value.into();
        state.entries.insert(path.to_string(), (value.clone(), rev));
        self.publish(path, Some(value), rev);
        encode_revision(rev)
    }

    /// Unconditional delete; returns whether the path existed.
    pub fn remove(
        &self,
        path: &str,
    ) -> bool {
        let mut state = self.state.lock();
        if state.entries.remove(path).is_none() {
            return false;
        }
        let rev = state.next_revision();
        self.publish(path, None, rev);
        true
    }

    pub fn get(
        &self,
        path: &str,
    ) -> Option<(Bytes, Revision)> {
        let state = self.state.lock();
        state
            .entries
            .get(path)
            .map(|(value, rev)| (value.clone(), encode_revision(*rev)))
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live watch streams.
    pub fn watcher_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Breaks every active watch stream with a transport error.
    pub fn disconnect_watchers(&self) {
        self.disconnect_epoch.send_modify(|epoch| *epoch += 1);
        debug!("disconnected {} watch streams", self.changes.receiver_count());
    }

    fn publish(
        &self,
        path: &str,
        value: Option<Bytes>,
        rev: u64,
    ) {
        trace!(path, rev, deleted = value.is_none(), "publish change");
        // No receivers is fine: nobody watches yet
        let _ = self.changes.send(RemoteChange {
            path: path.to_string(),
            value,
            revision: encode_revision(rev),
        });
    }

    fn check_revision(
        path: &str,
        current: u64,
        expected: &Revision,
    ) -> StoreResult<()> {
        match decode_revision(expected) {
            Some(rev) if rev == current => Ok(()),
            _ => Err(StoreError::RevisionMismatch { path: path.to_string() }),
        }
    }
}

#[async_trait::async_trait]
impl MetaStore for MemMetaStore {
    async fn create(
        &self,
        path: &str,
        value: Bytes,
    ) -> StoreResult<Revision> {
        let mut state = self.state.lock();
        if state.entries.contains_key(path) {
            return Err(StoreError::AlreadyExists { path: path.to_string() });
        }
        let rev = state.next_revision();
        state.entries.insert(path.to_string(), (value.clone(), rev));
        self.publish(path, Some(value), rev);
        Ok(encode_revision(rev))
    }

    async fn conditional_write(
        &self,
        path: &str,
        value: Bytes,
        revision: &Revision,
    ) -> StoreResult<Revision> {
        let mut state = self.state.lock();
        let current = match state.entries.get(path) {
            Some((_, rev)) => *rev,
            None => return Err(StoreError::NotFound { path: path.to_string() }),
        };
        Self::check_revision(path, current, revision)?;

        let rev = state.next_revision();
        state.entries.insert(path.to_string(), (value.clone(), rev));
        self.publish(path, Some(value), rev);
        Ok(encode_revision(rev))
    }

    async fn conditional_delete(
        &self,
        path: &str,
        revision: Option<Revision>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        let current = state.entries.get(path).map(|(_, rev)| *rev);
        match (current, revision) {
            (None, None) => return Ok(()),
            (None, Some(_)) => return Err(StoreError::NotFound { path: path.to_string() }),
            (Some(current), Some(expected)) => Self::check_revision(path, current, &expected)?,
            (Some(_), None) => {}
        }

        state.entries.remove(path);
        let rev = state.next_revision();
        self.publish(path, None, rev);
        Ok(())
    }

    async fn watch_children(
        &self,
        prefix: &str,
        sink: mpsc::Sender<WatchEvent>,
        cancel: CancellationToken,
    ) -> StoreResult<()> {
        let mut disconnect = self.disconnect_epoch.subscribe();
        // Subscribe and snapshot atomically so no commit falls between them
        let (mut changes, snapshot) = {
            let state = self.state.lock();
            (self.changes.subscribe(), state.listing(prefix))
        };

        debug!(prefix, replayed = snapshot.children.len(), "watch started");
        forward(&sink, WatchEvent::Snapshot(snapshot), &cancel).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(prefix, "watch cancelled");
                    return Ok(());
                }
                _ = disconnect.changed() => {
                    return Err(StoreError::Transport("watch stream disconnected".to_string()));
                }
                received = changes.recv() => match received {
                    Ok(change) => {
                        if change.path.starts_with(prefix) {
                            forward(&sink, WatchEvent::Change(change), &cancel).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(prefix, missed, "watch stream lagged behind");
                        return Err(StoreError::Transport(format!("watch lagged by {missed} changes")));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::Transport("change feed closed".to_string()));
                    }
                },
            }
        }
    }

    async fn enumerate_children(
        &self,
        prefix: &str,
    ) -> StoreResult<Listing> {
        Ok(self.state.lock().listing(prefix))
    }

    async fn recursive_delete(
        &self,
        prefix: &str,
    ) -> StoreResult<Revision> {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect();

        for path in doomed {
            state.entries.remove(&path);
            let rev = state.next_revision();
            self.publish(&path, None, rev);
        }
        Ok(encode_revision(state.last_revision))
    }

    fn compare_revisions(
        &self,
        a: &Revision,
        b: &Revision,
    ) -> Ordering {
        match (decode_revision(a), decode_revision(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            // Foreign tokens: big-endian encoding keeps byte order equal to commit order
            _ => a.as_bytes().cmp(b.as_bytes()),
        }
    }
}

async fn forward(
    sink: &mpsc::Sender<WatchEvent>,
    event: WatchEvent,
    cancel: &CancellationToken,
) -> StoreResult<()> {
    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        sent = sink.send(event) => sent.map_err(|_| StoreError::Closed),
    }
}

pub(crate) fn encode_revision(rev: u64) -> Revision {
    Revision::new(Bytes::copy_from_slice(&rev.to_be_bytes()))
}

pub(crate) fn decode_revision(revision: &Revision) -> Option<u64> {
    let bytes: [u8; 8] = revision.as_bytes().try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
