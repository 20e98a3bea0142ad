//! Configuration coordination layer for a clustered partition manager.
//!
//! Cluster-wide metadata (index definitions, partition assignments, node
//! membership) lives in an external strongly consistent [`MetaStore`].
//! [`StoreBackedCfg`] mirrors one namespace of that store into a local
//! [`ConfigCache`], gates every local write behind the store's conditional
//! primitives, and follows remote writes through a self-healing watch.
//! Callers program against the [`Cfg`] trait and observe changes through
//! [`CfgEvent`] subscriptions.

mod cfg;
mod config;
mod constants;
mod errors;
pub mod metrics;
mod store;
pub mod utils;

pub use cfg::*;
pub use config::*;
pub use constants::*;
pub use errors::*;
pub use store::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
