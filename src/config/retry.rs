use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid(format!(
                "retry.{name}: base_delay_ms {} exceeds max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (starting at 0): exponential in the
    /// attempt, capped at `max_delay_ms`, with up to 20% random jitter below
    /// the computed value.
    pub fn delay_for(
        &self,
        attempt: u32,
    ) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(self.max_delay_ms);
        let jitter = if capped >= 5 {
            rand::thread_rng().gen_range(0..=capped / 5)
        } else {
            0
        };
        Duration::from_millis(capped - jitter)
    }
}

/// Divide strategies by background activity
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RetryPolicies {
    /// Watch stream restarts. Retried without limit.
    #[serde(default)]
    pub watch: BackoffPolicy,
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.watch.validate("watch")
    }
}

fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5000
}
