//! Condition variable bound to a [`Lock`].

use std::collections::VecDeque;
use std::convert::Infallible;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::{SchedulerError, ThreadId};
use crate::sync::Lock;

/// Condition variable with strict FIFO wake order.
///
/// Every operation requires the caller to hold the associated lock.
#[derive(Debug)]
pub struct Condition {
    lock: Lock,
    waiters: Mutex<VecDeque<ThreadId>>,
}

impl Condition {
    /// Create a condition variable over `lock`.
    #[must_use]
    pub fn new(lock: &Lock) -> Self {
        Self {
            lock: lock.clone(),
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    fn check_held(&self) -> Result<(), SchedulerError> {
        if self.lock.is_held_by_current_thread() {
            Ok(())
        } else {
            Err(SchedulerError::LockNotHeld)
        }
    }

    /// Release the lock, block until woken, then reacquire the lock.
    ///
    /// Enqueueing and blocking happen as one step, so a `wake` issued after
    /// the lock is released cannot be lost.
    ///
    /// # Errors
    ///
    /// `SchedulerError::LockNotHeld` if the caller does not hold the lock.
    pub fn sleep(&self) -> Result<(), SchedulerError> {
        self.check_held()?;
        self.lock.release()?;
        let Ok(()) = self.lock.kernel().sleep_with(|me| {
            self.waiters.lock().push_back(me);
            Ok::<(), Infallible>(())
        });
        self.lock.acquire()
    }

    /// Wake the longest-waiting thread, if any.
    ///
    /// # Errors
    ///
    /// `SchedulerError::LockNotHeld` if the caller does not hold the lock.
    pub fn wake(&self) -> Result<(), SchedulerError> {
        self.check_held()?;
        let next = self.waiters.lock().pop_front();
        if let Some(thread) = next {
            debug!(thread = %thread, "condition wake");
            self.lock.kernel().ready(thread)?;
        }
        Ok(())
    }

    /// Wake every waiting thread in FIFO order.
    ///
    /// # Errors
    ///
    /// `SchedulerError::LockNotHeld` if the caller does not hold the lock.
    pub fn wake_all(&self) -> Result<(), SchedulerError> {
        self.check_held()?;
        loop {
            let next = self.waiters.lock().pop_front();
            let Some(thread) = next else {
                return Ok(());
            };
            self.lock.kernel().ready(thread)?;
        }
    }

    /// Number of sleeping threads.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiters.lock().len()
    }
}
