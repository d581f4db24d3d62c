//! Worker thread scheduling helpers.
//!
//! Everything here is best-effort. Callers log failures and carry on: an
//! unprivileged process cannot enter `SCHED_FIFO`, and that must not stop the
//! engine from starting.

use std::io::{Error as IoError, ErrorKind, Result as IoResult};

/// OS-level thread id.
pub type Tid = i32;

/// Scheduling policy applied to the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Real-time first-in first-out at the given priority.
    Fifo {
        /// `1..=99`; higher runs first.
        priority: i32,
    },
    /// The default time-sharing policy.
    Other,
}

/// Apply `policy` to the calling thread.
///
/// # Errors
/// Returns the OS error when the kernel refuses the change, or `Unsupported` on
/// platforms without `sched_setscheduler`.
#[cfg(target_os = "linux")]
pub fn set_current_thread_policy(policy: SchedPolicy) -> IoResult<()> {
    let (raw_policy, priority) = match policy {
        SchedPolicy::Fifo { priority } => (libc::SCHED_FIFO, priority),
        SchedPolicy::Other => (libc::SCHED_OTHER, 0),
    };
    // Some libc targets carry extra sporadic-server fields; zero them.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;

    // pid 0 targets the calling thread.
    let result = unsafe { libc::sched_setscheduler(0, raw_policy, &param) };
    if result != 0 {
        return Err(IoError::last_os_error());
    }
    Ok(())
}

/// Apply `policy` to the calling thread.
///
/// # Errors
/// Always `Unsupported` on this platform.
#[cfg(not(target_os = "linux"))]
pub fn set_current_thread_policy(policy: SchedPolicy) -> IoResult<()> {
    Err(IoError::new(
        ErrorKind::Unsupported,
        format!("cannot apply {policy:?}: thread scheduling policy is not supported on this platform"),
    ))
}

/// OS thread id of the calling thread, where the platform exposes one.
#[cfg(target_os = "linux")]
#[must_use]
pub fn current_tid() -> Option<Tid> {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    Tid::try_from(tid).ok()
}

/// OS thread id of the calling thread, where the platform exposes one.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn current_tid() -> Option<Tid> {
    None
}

/// Whether `err` means the process lacks the privilege for real-time policies.
#[must_use]
pub fn is_permission_error(err: &IoError) -> bool {
    err.kind() == ErrorKind::PermissionDenied
}
