//! Proxy configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ThreadedError, ThreadedResult};

/// Highest priority accepted by `SCHED_FIFO` on Linux.
pub const MAX_FIFO_PRIORITY: i32 = 99;

/// Configuration for a [`ThreadedEngine`](crate::ThreadedEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadedEngineConfig {
    /// Name given to the worker thread.
    pub thread_name: String,
    /// Run the worker under `SCHED_FIFO` once it starts.
    pub realtime: bool,
    /// Priority used while the worker runs under `SCHED_FIFO`.
    pub fifo_priority: i32,
    /// Drop to `SCHED_OTHER` while the engine primes its caches.
    pub relax_priority_for_prime_cache: bool,
}

impl Default for ThreadedEngineConfig {
    fn default() -> Self {
        Self {
            thread_name: "RenderEngine".to_string(),
            realtime: true,
            fifo_priority: 2,
            relax_priority_for_prime_cache: true,
        }
    }
}

impl ThreadedEngineConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the JSON is malformed or fails [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> ThreadedResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ThreadedError::invalid_config(format!("malformed config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can be applied.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for an empty thread name, a name containing NUL, or a
    /// FIFO priority outside `1..=99`.
    pub fn validate(&self) -> ThreadedResult<()> {
        if self.thread_name.trim().is_empty() {
            return Err(ThreadedError::invalid_config("thread name is empty"));
        }
        if self.thread_name.contains('\0') {
            return Err(ThreadedError::invalid_config("thread name contains a NUL byte"));
        }
        if !(1..=MAX_FIFO_PRIORITY).contains(&self.fifo_priority) {
            return Err(ThreadedError::invalid_config(format!(
                "fifo priority {} is outside 1..={MAX_FIFO_PRIORITY}",
                self.fifo_priority
            )));
        }
        Ok(())
    }
}
