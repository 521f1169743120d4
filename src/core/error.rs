//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::{QueueId, ThreadId};

/// Errors produced by scheduler and kernel components.
///
/// Every variant except [`SchedulerError::Deadlock`] and
/// [`SchedulerError::ThreadPanicked`] is a contract violation: the caller
/// used an entry point in a way the scheduler does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Requested priority lies outside the active policy's bounds.
    #[error("priority {priority} outside [{minimum}, {maximum}]")]
    PriorityOutOfRange {
        /// Rejected value.
        priority: u64,
        /// Lowest allowed value.
        minimum: u64,
        /// Highest allowed value.
        maximum: u64,
    },
    /// A thread tried to wait on a second queue.
    #[error("thread {thread} already waiting on queue {queue}")]
    AlreadyWaiting {
        /// Offending thread.
        thread: ThreadId,
        /// Queue it is currently waiting on.
        queue: QueueId,
    },
    /// Operation requires holding the associated lock.
    #[error("lock not held by current thread")]
    LockNotHeld,
    /// Lock acquired twice by the same thread.
    #[error("lock already held by current thread")]
    LockAlreadyHeld,
    /// A second timer handler was registered while one is live.
    #[error("timer interrupt handler already installed")]
    TimerHandlerInUse,
    /// Thread status does not allow the requested transition.
    #[error("invalid transition for thread {thread}: {reason}")]
    InvalidTransition {
        /// Thread being transitioned.
        thread: ThreadId,
        /// Why the transition was refused.
        reason: &'static str,
    },
    /// A thread tried to join itself.
    #[error("thread {0} cannot join itself")]
    SelfJoin(ThreadId),
    /// Nothing runnable and nothing pending on the timer.
    #[error("deadlock: no runnable threads and no pending timer work")]
    Deadlock,
    /// A forked thread panicked.
    #[error("thread `{name}` panicked: {message}")]
    ThreadPanicked {
        /// Thread name.
        name: String,
        /// Panic payload rendered as text.
        message: String,
    },
    /// The OS refused to spawn a backing thread.
    #[error("spawn failed: {0}")]
    Spawn(String),
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
