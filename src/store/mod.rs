//! External metadata store boundary.
//!
//! The store is the source of truth. It owns revisions and offers the
//! conditional primitives the adapter relies on for consistency; this crate
//! never implements consensus itself.

mod mem_meta_store;

#[cfg(test)]
mod mem_meta_store_test;

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
pub use mem_meta_store::*;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::StoreResult;

/// Opaque version token issued by the external store.
///
/// Never interpreted outside the store: tokens are handed back to the store's
/// conditional operations and ordered through [`MetaStore::compare_revisions`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Revision(Bytes);

impl Revision {
    pub fn new(token: impl Into<Bytes>) -> Self {
        Self(token.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Revision {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Revision(")?;
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// One child of a watched prefix as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    /// Full store path, including the namespace prefix
    pub path: String,
    /// `None` when the child was deleted
    pub value: Option<Bytes>,
    pub revision: Revision,
}

/// Children of a prefix as of one store revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub children: Vec<RemoteChange>,
    /// Latest revision committed store-wide when the listing was taken. Every
    /// change at or before it is reflected in `children`.
    pub revision: Revision,
}

/// Item delivered by [`MetaStore::watch_children`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Full state of the prefix, sent once when a watch (re)starts
    Snapshot(Listing),
    /// One change committed after the snapshot
    Change(RemoteChange),
}

/// Strongly consistent store primitives required by [`crate::StoreBackedCfg`].
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait MetaStore: Send + Sync + 'static {
    /// Creates `path`. Fails with `AlreadyExists` if it is present.
    async fn create(
        &self,
        path: &str,
        value: Bytes,
    ) -> StoreResult<Revision>;

    /// Overwrites `path` if its current revision is `revision`.
    async fn conditional_write(
        &self,
        path: &str,
        value: Bytes,
        revision: &Revision,
    ) -> StoreResult<Revision>;

    /// Deletes `path` if its current revision is `revision`; `None` deletes
    /// unconditionally.
    async fn conditional_delete(
        &self,
        path: &str,
        revision: Option<Revision>,
    ) -> StoreResult<()>;

    /// Streams changes under `prefix` into `sink`.
    ///
    /// Every (re)start first sends a [`WatchEvent::Snapshot`] taken atomically
    /// with the subscription, so a restarted watch learns about creates and
    /// deletes it missed, then forwards live changes in commit order.
    /// Returns `Ok(())` once `cancel` fires and an error when the stream breaks.
    async fn watch_children(
        &self,
        prefix: &str,
        sink: mpsc::Sender<WatchEvent>,
        cancel: CancellationToken,
    ) -> StoreResult<()>;

    /// One-shot listing of every child under `prefix`.
    async fn enumerate_children(
        &self,
        prefix: &str,
    ) -> StoreResult<Listing>;

    /// Deletes every child under `prefix` and returns the store revision once
    /// they are gone.
    async fn recursive_delete(
        &self,
        prefix: &str,
    ) -> StoreResult<Revision>;

    /// Orders two revisions issued by this store by commit time.
    fn compare_revisions(
        &self,
        a: &Revision,
        b: &Revision,
    ) -> Ordering;
}
