//! Cache kept in sync with an external [`MetaStore`].
//!
//! Local writes are gated by the store's conditional primitives and only reach
//! the cache once the store accepted them. Remote writes arrive through a watch
//! task that hands every change to a single apply task, so changes land in the
//! cache in the order the store delivered them.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::CasConstraint;
use super::Cfg;
use super::CfgEvent;
use super::ConfigCache;
use super::Reconciled;
use super::RemoteApply;
use crate::async_task::sleep_unless_cancelled;
use crate::async_task::spawn_task;
use crate::metrics::ASYNC_ERROR_TOTAL;
use crate::metrics::CAS_MISMATCH_TOTAL;
use crate::metrics::REMOTE_CHANGE_APPLIED_TOTAL;
use crate::metrics::WATCH_RESTART_TOTAL;
use crate::BackoffPolicy;
use crate::Listing;
use crate::Error;
use crate::MetaStore;
use crate::RemoteChange;
use crate::Result;
use crate::Revision;
use crate::Settings;
use crate::StoreError;
use crate::WatchConfig;
use crate::WatchEvent;
use crate::APPLY_TASK_NAME;
use crate::DEFAULT_SUBSCRIBER_BUFFER_SIZE;
use crate::WATCH_TASK_NAME;

struct Inner<S> {
    store: Arc<S>,
    cache: ConfigCache,
    prefix: String,
    watch: WatchConfig,
    backoff: BackoffPolicy,
    subscriber_buffer_size: usize,
    cancel: CancellationToken,
}

/// [`Cfg`] backed by an external metadata store.
///
/// # Lifecycle
/// ```ignore
/// let cfg = StoreBackedCfg::new(store, &settings);
/// cfg.load().await?;   // seed from the store
/// cfg.start();         // follow remote changes
/// ...
/// cfg.shutdown().await;
/// ```
pub struct StoreBackedCfg<S: MetaStore> {
    inner: Arc<Inner<S>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: MetaStore> std::fmt::Debug for StoreBackedCfg<S> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StoreBackedCfg")
            .field("prefix", &self.inner.prefix)
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

impl<S: MetaStore> StoreBackedCfg<S> {
    pub fn new(
        store: Arc<S>,
        settings: &Settings,
    ) -> Self {
        Self::with_parts(
            store,
            settings.cfg.prefix.clone(),
            settings.watch.clone(),
            settings.retry.watch,
            settings.cfg.subscriber_buffer_size,
        )
    }

    /// Instance with default sizing and retry settings under `prefix`.
    pub fn with_prefix(
        store: Arc<S>,
        prefix: impl Into<String>,
    ) -> Self {
        Self::with_parts(
            store,
            prefix.into(),
            WatchConfig::default(),
            BackoffPolicy::default(),
            DEFAULT_SUBSCRIBER_BUFFER_SIZE,
        )
    }

    fn with_parts(
        store: Arc<S>,
        prefix: String,
        watch: WatchConfig,
        backoff: BackoffPolicy,
        subscriber_buffer_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                cache: ConfigCache::new(),
                prefix,
                watch,
                backoff,
                subscriber_buffer_size,
                cancel: CancellationToken::new(),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Keys currently mirrored locally.
    pub fn keys(&self) -> Vec<String> {
        self.inner.cache.keys()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty() && !self.inner.cancel.is_cancelled()
    }

    /// Spawns the watch and apply tasks. Calling it again, or after
    /// `shutdown()`, does nothing.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.inner.cancel.is_cancelled() {
            return;
        }

        let (tx, rx) = mpsc::channel(self.inner.watch.apply_queue_size);

        let inner = self.inner.clone();
        tasks.push(spawn_task(APPLY_TASK_NAME, move || inner.run_apply(rx)));

        let inner = self.inner.clone();
        tasks.push(spawn_task(WATCH_TASK_NAME, move || inner.run_watch(tx)));

        info!(prefix = %self.inner.prefix, "cfg watch started");
    }

    /// Brings the cache in line with every child currently in the store.
    ///
    /// Returns how many children were enumerated.
    pub async fn load(&self) -> Result<usize> {
        let listing = self.inner.store.enumerate_children(&self.inner.prefix).await?;
        let count = listing.children.len();
        let outcome = self.inner.apply_listing(listing);
        debug!(count, deleted = outcome.deleted, prefix = %self.inner.prefix, "loaded cfg from store");
        Ok(count)
    }

    /// Cancels the background tasks and waits for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("cfg background task join failed: {:?}", e);
            }
        }
        info!(prefix = %self.inner.prefix, "cfg watch stopped");
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &ConfigCache {
        &self.inner.cache
    }

    #[cfg(test)]
    pub(crate) fn apply_remote_change(
        &self,
        change: RemoteChange,
    ) -> Option<RemoteApply> {
        self.inner.apply_remote_change(change)
    }

    /// Creates a subscriber channel sized by `cfg.subscriber_buffer_size` and
    /// registers its sender for `key`.
    pub fn subscribe_channel(
        &self,
        key: &str,
    ) -> Result<mpsc::Receiver<CfgEvent>> {
        let (tx, rx) = mpsc::channel(self.inner.subscriber_buffer_size);
        self.inner.cache.subscribe(key, tx)?;
        Ok(rx)
    }
}

impl<S: MetaStore> Drop for StoreBackedCfg<S> {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl<S: MetaStore> Inner<S> {
    fn make_path(
        &self,
        key: &str,
    ) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn order(&self) -> impl Fn(&Revision, &Revision) -> Ordering + '_ {
        move |a: &Revision, b: &Revision| self.store.compare_revisions(a, b)
    }

    fn key_of<'a>(
        &self,
        path: &'a str,
    ) -> Option<&'a str> {
        path.strip_prefix(self.prefix.as_str()).filter(|key| !key.is_empty())
    }

    /// Force-applies one store-confirmed change. Paths outside the namespace
    /// are ignored.
    fn apply_remote_change(
        &self,
        change: RemoteChange,
    ) -> Option<RemoteApply> {
        let Some(key) = self.key_of(&change.path) else {
            warn!(path = %change.path, prefix = %self.prefix, "ignoring change outside namespace");
            return None;
        };

        let outcome = self
            .cache
            .apply_remote(key, change.value, change.revision, &self.order());
        match outcome {
            RemoteApply::Updated(cas) => {
                debug!(key, cas, "applied remote update");
                REMOTE_CHANGE_APPLIED_TOTAL.with_label_values(&["update"]).inc();
            }
            RemoteApply::Deleted => {
                debug!(key, "applied remote delete");
                REMOTE_CHANGE_APPLIED_TOTAL.with_label_values(&["delete"]).inc();
            }
            RemoteApply::Unchanged => {
                trace!(key, "remote change already reflected");
                REMOTE_CHANGE_APPLIED_TOTAL.with_label_values(&["unchanged"]).inc();
            }
        }
        Some(outcome)
    }

    /// Reconciles the cache with a full listing of the namespace.
    fn apply_listing(
        &self,
        listing: Listing,
    ) -> Reconciled {
        let children = listing
            .children
            .into_iter()
            .filter_map(|change| {
                let key = self.key_of(&change.path)?.to_string();
                // A listing never carries deletes
                let value = change.value?;
                Some((key, value, change.revision))
            })
            .collect();
        let outcome = self.cache.reconcile(children, &listing.revision, &self.order());
        if outcome.deleted > 0 {
            info!(prefix = %self.prefix, deleted = outcome.deleted, "dropped keys missing from store listing");
            REMOTE_CHANGE_APPLIED_TOTAL
                .with_label_values(&["delete"])
                .inc_by(outcome.deleted as u64);
        }
        if outcome.updated > 0 {
            REMOTE_CHANGE_APPLIED_TOTAL
                .with_label_values(&["update"])
                .inc_by(outcome.updated as u64);
        }
        outcome
    }

    /// Turns a store rejection into the caller-facing error.
    fn store_failure(
        &self,
        op: &str,
        key: &str,
        expected: CasConstraint,
        snapshot_cas: u64,
        err: StoreError,
    ) -> Error {
        if err.is_conflict() {
            debug!(op, key, "store rejected write: {}", err);
            CAS_MISMATCH_TOTAL.with_label_values(&[op, "store"]).inc();
            Error::CasMismatch {
                key: key.to_string(),
                expected,
                current: snapshot_cas,
            }
        } else {
            warn!(op, key, "store call failed: {}", err);
            Error::ExternalStore(err)
        }
    }

    fn local_failure(
        &self,
        op: &str,
        err: Error,
    ) -> Error {
        if err.is_cas_mismatch() {
            CAS_MISMATCH_TOTAL.with_label_values(&[op, "local"]).inc();
        }
        err
    }

    fn report(
        &self,
        err: &Error,
    ) {
        error!(prefix = %self.prefix, "cfg async error: {}", err);
        ASYNC_ERROR_TOTAL.inc();
    }

    async fn run_apply(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<WatchEvent>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                event = rx.recv() => match event {
                    Some(WatchEvent::Change(change)) => {
                        self.apply_remote_change(change);
                    }
                    Some(WatchEvent::Snapshot(listing)) => {
                        let outcome = self.apply_listing(listing);
                        debug!(prefix = %self.prefix, ?outcome, "watch snapshot reconciled");
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    /// Keeps a watch open until cancelled, restarting it after every failure.
    async fn run_watch(
        self: Arc<Self>,
        tx: mpsc::Sender<WatchEvent>,
    ) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let opened_at = Instant::now();
            let result = self
                .store
                .watch_children(&self.prefix, tx.clone(), self.cancel.clone())
                .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    // A stream that stayed up longer than the backoff cap was healthy
                    if opened_at.elapsed().as_millis() as u64 > self.backoff.max_delay_ms {
                        attempt = 0;
                    }
                    self.report(&Error::WatchStream(e));
                    WATCH_RESTART_TOTAL.inc();

                    let delay = self.backoff.delay_for(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(prefix = %self.prefix, attempt, ?delay, "restarting cfg watch");
                    if !sleep_unless_cancelled(delay, &self.cancel).await {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: MetaStore> Cfg for StoreBackedCfg<S> {
    fn get(
        &self,
        key: &str,
        cas: CasConstraint,
    ) -> Result<(Bytes, u64)> {
        self.inner.cache.get(key, cas)
    }

    /// Writes through to the store, then commits locally.
    ///
    /// A key never confirmed by the store is created there, which fails if a
    /// writer this replica has not observed yet created it first. Otherwise the
    /// write is conditional on the recorded revision.
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        cas: CasConstraint,
    ) -> Result<u64> {
        let inner = &self.inner;
        let snapshot = inner
            .cache
            .get_revision(key, cas)
            .map_err(|e| inner.local_failure("set", e))?;

        let path = inner.make_path(key);
        let written = match &snapshot.revision {
            None => inner.store.create(&path, value.clone()).await,
            Some(revision) => inner.store.conditional_write(&path, value.clone(), revision).await,
        };
        let revision = written.map_err(|e| inner.store_failure("set", key, cas, snapshot.cas, e))?;

        inner
            .cache
            .commit_set(key, value, revision, snapshot.cas, &inner.order())
    }

    async fn del(
        &self,
        key: &str,
        cas: CasConstraint,
    ) -> Result<()> {
        let inner = &self.inner;
        let snapshot = inner
            .cache
            .get_revision(key, cas)
            .map_err(|e| inner.local_failure("del", e))?;

        let path = inner.make_path(key);
        inner
            .store
            .conditional_delete(&path, snapshot.revision.clone())
            .await
            .map_err(|e| inner.store_failure("del", key, cas, snapshot.cas, e))?;

        inner.cache.commit_del(key, &snapshot, &inner.order());
        Ok(())
    }

    fn subscribe(
        &self,
        key: &str,
        sink: mpsc::Sender<CfgEvent>,
    ) -> Result<()> {
        self.inner.cache.subscribe(key, sink)
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn on_error(
        &self,
        err: &Error,
    ) {
        self.inner.report(err);
    }

    /// Wipes the namespace in the store, then drops every cached key not
    /// rewritten since the wipe.
    async fn erase_all(&self) -> Result<()> {
        let inner = &self.inner;
        let wiped_at = inner.store.recursive_delete(&inner.prefix).await?;
        let outcome = inner.cache.reconcile(Vec::new(), &wiped_at, &inner.order());
        info!(prefix = %inner.prefix, erased = outcome.deleted, "erased cfg namespace");
        Ok(())
    }
}
