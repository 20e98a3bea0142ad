//! Configuration management for the coordination layer.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file named by `CONFIG_PATH`
//! - Environment variable overrides (`CFG__` prefix, `__` separator)
//! - Component-wise validation
mod cfg;
mod logging;
mod monitoring;
mod retry;
pub use cfg::*;
pub use logging::*;
pub use monitoring::*;
pub use retry::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

const ENV_PREFIX: &str = "CFG";

/// Main configuration container
///
/// Sources, later ones overriding earlier ones:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Namespace and cache parameters
    #[serde(default)]
    pub cfg: CfgConfig,
    /// Watch/apply pipeline sizing
    #[serde(default)]
    pub watch: WatchConfig,
    /// Retry policies for background store interaction
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Metrics exporter settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Debug for Settings {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("cfg", &self.cfg)
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// # Note
    /// Validation is deferred so further overrides can be applied with
    /// `with_override_config()`. Callers must call `validate()` before use.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/cfg.toml");
    /// std::env::set_var("CFG__CFG__PREFIX", "/indexes/cfg/");
    /// let settings = Settings::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies additional overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.cfg.validate()?;
        self.watch.validate()?;
        self.retry.validate()?;
        self.monitoring.validate()?;
        self.log.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

pub(super) fn invalid(msg: impl Into<String>) -> Error {
    Error::Config(ConfigError::Message(msg.into()))
}
