use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// Directory receiving the rolling log file of the binary
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(invalid("log.log_dir path cannot be empty"));
        }
        if self.file_prefix.is_empty() {
            return Err(invalid("log.file_prefix cannot be empty"));
        }
        Ok(())
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_log_file_prefix() -> String {
    "cfg-sync.log".to_string()
}
