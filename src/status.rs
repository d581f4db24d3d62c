//! Proxy identity and diagnostic snapshots.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one proxy instance, used in log fields.
///
/// ```
/// use threaded_engine::ProxyId;
///
/// let id = ProxyId::new();
/// assert_ne!(id, ProxyId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyId(Uuid);

impl ProxyId {
    /// Creates a new random proxy ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProxyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Applying scheduling policy and constructing the engine.
    Starting,
    /// Dispatching queued work.
    Running,
    /// Shutdown requested; dropping leftover work and the engine.
    ///
    /// Transient. Teardown consumes the proxy and joins the worker before
    /// returning, so a status taken through a live handle never reports it.
    Draining,
    /// The worker has exited.
    Stopped,
}

impl WorkerState {
    const fn to_raw(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Draining => 2,
            Self::Stopped => 3,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Counters shared between the worker and the proxy handle.
#[derive(Debug)]
pub(crate) struct WorkerStats {
    state: AtomicU8,
    executed: AtomicU64,
    panicked: AtomicU64,
    dropped: AtomicU64,
}

impl WorkerStats {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Starting.to_raw()),
            executed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state.to_raw(), Ordering::Release);
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: usize) {
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub(crate) fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a proxy, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStatus {
    /// Proxy identity.
    pub id: ProxyId,
    /// Worker thread name.
    pub thread_name: String,
    /// Worker lifecycle state.
    pub state: WorkerState,
    /// Items waiting in the queue.
    pub queued: usize,
    /// Items that ran to completion.
    pub executed: u64,
    /// Items that panicked while running.
    pub panicked: u64,
    /// Items discarded unexecuted at shutdown or after a failed start.
    ///
    /// Stays zero while the worker runs; read it from the status returned by
    /// [`ThreadedEngine::shutdown`](crate::ThreadedEngine::shutdown) or after
    /// initialization failed.
    pub dropped: u64,
    /// When the engine finished constructing, if it has.
    pub initialized_at: Option<DateTime<Utc>>,
}

impl ProxyStatus {
    /// Render as a single JSON line.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
