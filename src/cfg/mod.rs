//! Configuration contract shared by every coordination backend.
//!
//! Upstream orchestration code talks to a [`Cfg`] and never learns whether the
//! entries live only in process memory ([`ConfigCache`]) or are mirrored from an
//! external metadata store ([`StoreBackedCfg`]).
//!
//! ```text
//!  caller ──set()──▶ StoreBackedCfg ──conditional write──▶ MetaStore
//!                         │                                   │
//!                         │ force-apply                  watch_children
//!                         ▼                                   │
//!                    ConfigCache ◀──── apply task ◀───────────┘
//!                         │
//!                    try_send(CfgEvent)
//!                         ▼
//!                    subscribers
//! ```

mod local_cache;
mod store_backed;


use std::fmt;

use bytes::Bytes;
pub use local_cache::*;
#[cfg(test)]
use mockall::automock;
pub use store_backed::*;
use tokio::sync::mpsc;

use crate::Error;
use crate::Result;
use crate::Revision;

/// Optimistic-concurrency precondition supplied by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CasConstraint {
    /// Apply regardless of the current CAS
    #[default]
    NoConstraint,
    /// Apply only if the entry exists with exactly this CAS
    MustMatch(u64),
    /// Apply only if the key currently has no entry
    MustNotExist,
}

impl fmt::Display for CasConstraint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            CasConstraint::NoConstraint => write!(f, "any"),
            CasConstraint::MustMatch(cas) => write!(f, "cas={cas}"),
            CasConstraint::MustNotExist => write!(f, "absent"),
        }
    }
}

/// Constraint as seen by the cache internals.
///
/// `ForceOverride` commits state the external store already confirmed and is
/// deliberately not constructible outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CasGuard {
    Checked(CasConstraint),
    ForceOverride,
}

impl From<CasConstraint> for CasGuard {
    fn from(constraint: CasConstraint) -> Self {
        CasGuard::Checked(constraint)
    }
}

/// Change signal delivered to subscribers. Carries no value: receivers re-read
/// the key to observe its current state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CfgEvent {
    pub key: String,
}

/// External revision together with the local CAS it was captured under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSnapshot {
    /// Local CAS at capture time, 0 when the key had no entry
    pub cas: u64,
    /// `None` when the key has never been confirmed by the external store
    pub revision: Option<Revision>,
}

/// Uniform capability surface of a configuration backend.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Cfg: Send + Sync + 'static {
    /// Returns the current value and CAS of `key`.
    ///
    /// # Errors
    /// - [`Error::NotFound`] when the key has no entry
    /// - [`Error::CasMismatch`] when `cas` does not hold
    fn get(
        &self,
        key: &str,
        cas: CasConstraint,
    ) -> Result<(Bytes, u64)>;

    /// Stores `value` under `key` and returns the new CAS.
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        cas: CasConstraint,
    ) -> Result<u64>;

    /// Removes `key`. Deleting an absent key with
    /// [`CasConstraint::NoConstraint`] succeeds and still notifies subscribers.
    ///
    /// # Errors
    /// - [`Error::CasMismatch`] when `cas` does not hold, locally or in the backend
    /// - [`Error::ExternalStore`] when a backing store cannot be reached
    async fn del(
        &self,
        key: &str,
        cas: CasConstraint,
    ) -> Result<()>;

    /// Registers a bounded sink that receives a [`CfgEvent`] after each change
    /// of `key`. Full sinks miss events instead of blocking writers.
    fn subscribe(
        &self,
        key: &str,
        sink: mpsc::Sender<CfgEvent>,
    ) -> Result<()>;

    /// Pulls fresh state from the backend. Push-driven backends do nothing.
    async fn refresh(&self) -> Result<()>;

    /// Reports an asynchronous fault. Logging only.
    fn on_error(
        &self,
        err: &Error,
    );

    /// Removes every key of this instance's namespace.
    async fn erase_all(&self) -> Result<()>;
}
