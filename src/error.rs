//! Error types for the threaded engine proxy.
//!
//! Engine-level failures never travel through this type: they are logged on the
//! worker thread and reconciled there. What callers can observe is limited to
//! the proxy's own plumbing: the worker could not be started, it is gone, or a
//! reply never arrived.

use thiserror::Error;

/// Top-level error type for proxy operations.
#[derive(Debug, Error)]
pub enum ThreadedError {
    #[error("Failed to spawn worker thread '{thread_name}': {source}")]
    Spawn {
        thread_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine initialization failed on worker thread '{thread_name}'")]
    InitializationFailed {
        thread_name: String,
    },

    #[error("Engine proxy is shutting down; '{operation}' was not enqueued")]
    ShutDown {
        operation: &'static str,
    },

    #[error("Reply for '{operation}' was dropped before it was fulfilled")]
    Disconnected {
        operation: &'static str,
    },

    #[error("Timed out after {duration_ms}ms waiting for '{operation}'")]
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

impl ThreadedError {
    /// Creates a configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns true if the proxy refused the call because teardown started.
    #[must_use]
    pub const fn is_shut_down(&self) -> bool {
        matches!(self, Self::ShutDown { .. })
    }

    /// Returns true if the reply channel closed without a value.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// Returns true if a bounded wait gave up.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if waiting again could still produce a value.
    ///
    /// Only a timed-out wait qualifies: the work item is still queued or running.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_timeout()
    }
}

/// Result type alias for proxy operations.
pub type ThreadedResult<T> = Result<T, ThreadedError>;
