use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs for the watcher loop. All values are whole seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Longest the loop sleeps before re-checking the schedule.
    pub max_sleep: u64,
    /// Delay before retrying a trigger that failed transiently.
    pub retry_delay: u64,
    /// Seconds past the deadline at which a default is fired. At least 1,
    /// since the ledger rejects defaults at the deadline itself.
    pub grace: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            max_sleep: 30,
            retry_delay: 5,
            grace: 1,
        }
    }
}

impl WatcherConfig {
    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep.max(1))
    }

    pub fn effective_grace(&self) -> u64 {
        self.grace.max(1)
    }

    pub fn effective_retry_delay(&self) -> u64 {
        self.retry_delay.max(1)
    }
}
