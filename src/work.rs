//! Work items, the worker's FIFO queue, and one-shot result channels.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{ThreadedError, ThreadedResult};

/// One deferred operation against the engine.
///
/// The closure owns everything it captured, so it can outlive the caller's
/// stack frame while it sits in the queue.
pub(crate) struct Work<E> {
    operation: &'static str,
    run: Box<dyn FnOnce(&mut E) + Send>,
}

impl<E> Work<E> {
    pub(crate) fn new(operation: &'static str, run: impl FnOnce(&mut E) + Send + 'static) -> Self {
        Self {
            operation,
            run: Box::new(run),
        }
    }

    pub(crate) const fn operation(&self) -> &'static str {
        self.operation
    }

    pub(crate) fn run(self, engine: &mut E) {
        (self.run)(engine);
    }
}

impl<E> fmt::Debug for Work<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work").field("operation", &self.operation).finish_non_exhaustive()
    }
}

struct QueueState<E> {
    queue: VecDeque<Work<E>>,
    running: bool,
}

/// FIFO of pending work plus the `running` flag, behind one mutex.
///
/// The condvar is notified on every push and on stop, and the worker waits for
/// "queue non-empty OR not running".
pub(crate) struct WorkQueue<E> {
    state: Mutex<QueueState<E>>,
    ready: Condvar,
}

impl<E> WorkQueue<E> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                running: true,
            }),
            ready: Condvar::new(),
        }
    }

    // Queue state is consistent between statements, so a panic elsewhere never
    // leaves it half-updated.
    fn lock(&self) -> MutexGuard<'_, QueueState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `work` and wake the worker.
    pub(crate) fn push(&self, work: Work<E>) -> ThreadedResult<()> {
        self.push_with(work, || {})
    }

    /// Append `work` and run `under_lock` while still holding the queue lock.
    ///
    /// Nothing is pushed and `under_lock` does not run once the queue is stopped.
    pub(crate) fn push_with(&self, work: Work<E>, under_lock: impl FnOnce()) -> ThreadedResult<()> {
        let mut state = self.lock();
        if !state.running {
            return Err(ThreadedError::ShutDown {
                operation: work.operation,
            });
        }
        state.queue.push_back(work);
        under_lock();
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Block until there is work to run. `None` once the queue is stopped, even
    /// if items remain.
    pub(crate) fn next(&self) -> Option<Work<E>> {
        let mut state = self.lock();
        loop {
            if !state.running {
                return None;
            }
            if let Some(work) = state.queue.pop_front() {
                return Some(work);
            }
            state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Clear `running` and wake the worker.
    pub(crate) fn stop(&self) {
        let mut state = self.lock();
        state.running = false;
        drop(state);
        self.ready.notify_all();
    }

    /// Take every item still queued.
    pub(crate) fn take_remaining(&self) -> VecDeque<Work<E>> {
        std::mem::take(&mut self.lock().queue)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().queue.len()
    }
}

/// Create a fresh one-shot result channel for `operation`.
pub(crate) fn reply_channel<T>(operation: &'static str) -> (Reply<T>, Pending<T>) {
    let (tx, rx) = bounded::<T>(1);
    (Reply { tx }, Pending { operation, rx })
}

/// Write half of a result channel. Consumed by its single write.
pub(crate) struct Reply<T> {
    tx: Sender<T>,
}

impl<T> Reply<T> {
    pub(crate) fn send(self, value: T) {
        // The caller may have dropped its handle; the value is simply discarded.
        let _ = self.tx.send(value);
    }
}

/// Read half of a result channel, returned to callers of asynchronous operations.
///
/// Dropping a `Pending` does not cancel the work; it still runs in queue order.
#[must_use = "dropping a Pending discards the result, the work still runs"]
pub struct Pending<T> {
    operation: &'static str,
    rx: Receiver<T>,
}

impl<T> Pending<T> {
    /// Name of the operation this handle waits on.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    /// Block until the worker fulfils the result.
    ///
    /// # Errors
    /// `Disconnected` if the work item was dropped without running (teardown) or
    /// panicked before replying.
    pub fn wait(self) -> ThreadedResult<T> {
        self.rx.recv().map_err(|_| ThreadedError::Disconnected {
            operation: self.operation,
        })
    }

    /// Block for at most `timeout`.
    ///
    /// A timeout leaves the work queued; the handle can be waited on again.
    ///
    /// # Errors
    /// `Timeout` when the deadline passes first, `Disconnected` as for [`wait`](Self::wait).
    pub fn wait_timeout(&self, timeout: Duration) -> ThreadedResult<T> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ThreadedError::Timeout {
                operation: self.operation,
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => ThreadedError::Disconnected {
                operation: self.operation,
            },
        })
    }

    /// Return the result if it is already available.
    ///
    /// # Errors
    /// `Disconnected` as for [`wait`](Self::wait).
    pub fn try_wait(&self) -> ThreadedResult<Option<T>> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ThreadedError::Disconnected {
                operation: self.operation,
            }),
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("operation", &self.operation)
            .field("ready", &!self.rx.is_empty())
            .finish()
    }
}
