use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;
use crate::DEFAULT_APPLY_QUEUE_SIZE;
use crate::DEFAULT_CFG_PREFIX;
use crate::DEFAULT_SUBSCRIBER_BUFFER_SIZE;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CfgConfig {
    /// Store path segment holding every key of this instance.
    /// Must start and end with `/`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Suggested capacity for subscriber channels created by callers
    #[serde(default = "default_subscriber_buffer_size")]
    pub subscriber_buffer_size: usize,
}

impl Default for CfgConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            subscriber_buffer_size: default_subscriber_buffer_size(),
        }
    }
}

impl CfgConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.prefix.starts_with('/') || !self.prefix.ends_with('/') {
            return Err(invalid(format!(
                "cfg.prefix {:?} must start and end with '/'",
                self.prefix
            )));
        }
        if self.subscriber_buffer_size == 0 {
            return Err(invalid("cfg.subscriber_buffer_size must be > 0"));
        }
        Ok(())
    }
}

fn default_prefix() -> String {
    DEFAULT_CFG_PREFIX.to_string()
}
fn default_subscriber_buffer_size() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER_SIZE
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Remote changes buffered between the watch task and the apply task
    #[serde(default = "default_apply_queue_size")]
    pub apply_queue_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            apply_queue_size: default_apply_queue_size(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.apply_queue_size == 0 {
            return Err(invalid("watch.apply_queue_size must be > 0"));
        }
        Ok(())
    }
}

fn default_apply_queue_size() -> usize {
    DEFAULT_APPLY_QUEUE_SIZE
}
