/// Namespace prefix under which one instance keeps its keys in the external store.
pub const DEFAULT_CFG_PREFIX: &str = "/cfg/";

/// Per-subscriber notification buffer.
pub const DEFAULT_SUBSCRIBER_BUFFER_SIZE: usize = 16;

/// Watch -> apply channel capacity.
pub const DEFAULT_APPLY_QUEUE_SIZE: usize = 1024;

/// Changes a [`crate::MemMetaStore`] watcher may fall behind before its stream breaks.
pub const DEFAULT_STORE_CHANGE_CAPACITY: usize = 1024;

pub const DEFAULT_PROMETHEUS_PORT: u16 = 9081;

pub(crate) const WATCH_TASK_NAME: &str = "cfg-watch";
pub(crate) const APPLY_TASK_NAME: &str = "cfg-apply";
