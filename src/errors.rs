//! Configuration Coordination Error Hierarchy
//!
//! Splits failures by who can act on them: optimistic-concurrency violations and
//! store failures are returned to the caller, watch-stream faults stay internal.

use config::ConfigError;

use crate::CasConstraint;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Read of a key that has no entry
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// Optimistic-concurrency violation, detected locally or by the external store
    #[error("CAS mismatch on key {key}: expected {expected}, current {current}")]
    CasMismatch {
        key: String,
        expected: CasConstraint,
        current: u64,
    },

    /// Transport or store-internal failure of a synchronous store call
    #[error(transparent)]
    ExternalStore(#[from] StoreError),

    /// Watch stream interrupted; retried internally and only surfaced via `on_error`
    #[error("Watch stream failed: {0}")]
    WatchStream(#[source] StoreError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    pub fn is_cas_mismatch(&self) -> bool {
        matches!(self, Error::CasMismatch { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Failures reported by a [`crate::MetaStore`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// `create` on a path that already exists
    #[error("Path already exists: {path}")]
    AlreadyExists { path: String },

    /// Conditional write/delete whose revision is not the current one
    #[error("Revision mismatch on path: {path}")]
    RevisionMismatch { path: String },

    /// Conditional write/delete on a path that no longer exists
    #[error("Path not found: {path}")]
    NotFound { path: String },

    /// Connectivity loss, lagging stream or store-internal failure
    #[error("Store transport error: {0}")]
    Transport(String),

    /// Receiving side of a change sink went away
    #[error("Change sink closed")]
    Closed,
}

impl StoreError {
    /// Whether the store rejected the operation because another writer got there first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyExists { .. }
                | StoreError::RevisionMismatch { .. }
                | StoreError::NotFound { .. }
        )
    }
}
