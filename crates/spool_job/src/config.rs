//! Configuration for the spooler runtime

use crate::error::{Result, SpoolError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime settings shared by every job in the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolConfig {
    /// Threads in the background pool that finalizes worker shutdown
    #[serde(default = "default_pool_threads")]
    pub pool_threads: usize,

    /// Pending operations the background pool accepts before blocking
    #[serde(default = "default_pool_queue")]
    pub pool_queue: usize,

    /// Name given to print worker threads
    #[serde(default = "default_worker_thread_name")]
    pub worker_thread_name: String,

    /// Host event pump poll interval during shutdown, in milliseconds
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,

    /// Default flush timeout, in milliseconds
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Per-page delay of the simulated device, in milliseconds
    #[serde(default)]
    pub page_delay_ms: u64,
}

fn default_pool_threads() -> usize {
    2
}

fn default_pool_queue() -> usize {
    64
}

fn default_worker_thread_name() -> String {
    "print-worker".to_string()
}

fn default_drain_poll_ms() -> u64 {
    10
}

fn default_flush_timeout_ms() -> u64 {
    5_000
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            pool_threads: default_pool_threads(),
            pool_queue: default_pool_queue(),
            worker_thread_name: default_worker_thread_name(),
            drain_poll_ms: default_drain_poll_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
            page_delay_ms: 0,
        }
    }
}

impl SpoolConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SpoolConfig =
            toml::from_str(content).map_err(|e| SpoolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pool_threads == 0 {
            return Err(SpoolError::Config("pool_threads must be at least 1".to_string()));
        }
        if self.worker_thread_name.trim().is_empty() {
            return Err(SpoolError::Config("worker_thread_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}
