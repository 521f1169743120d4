//! Mutual exclusion with priority donation.

use tracing::debug;

use crate::core::{ResourceQueue, SchedulerError, ThreadId};
use crate::kernel::Kernel;

/// Kernel lock. Threads blocked in [`Lock::acquire`] donate their effective
/// priority to the holder; [`Lock::release`] hands ownership straight to the
/// waiter the policy picks.
///
/// Clones share the same lock.
#[derive(Debug, Clone)]
pub struct Lock {
    kernel: Kernel,
    queue: ResourceQueue,
}

impl Lock {
    /// Create an unheld lock.
    #[must_use]
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            kernel: kernel.clone(),
            queue: kernel.scheduler().new_queue(true),
        }
    }

    /// Acquire the lock, blocking while another thread holds it.
    ///
    /// # Errors
    ///
    /// `SchedulerError::LockAlreadyHeld` if the caller already holds it.
    pub fn acquire(&self) -> Result<(), SchedulerError> {
        let me = self.kernel.current_thread().id();
        match self.queue.holder() {
            Some(holder) if holder == me => Err(SchedulerError::LockAlreadyHeld),
            None => {
                self.queue.acquire(me);
                Ok(())
            }
            Some(holder) => {
                debug!(thread = %me, holder = %holder, queue = %self.queue.id(), "lock contended");
                // Ownership is handed over by `release` before we run again.
                self.kernel
                    .sleep_with(|me| self.queue.wait_for_access(me))
            }
        }
    }

    /// Release the lock, passing it to the next waiter if there is one.
    ///
    /// # Errors
    ///
    /// `SchedulerError::LockNotHeld` unless the caller holds the lock.
    pub fn release(&self) -> Result<(), SchedulerError> {
        let me = self.kernel.current_thread().id();
        if self.queue.holder() != Some(me) {
            return Err(SchedulerError::LockNotHeld);
        }
        if let Some(next) = self.queue.next_thread() {
            self.kernel.ready(next)?;
        }
        Ok(())
    }

    /// Whether the running thread holds the lock.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.queue.holder() == Some(self.kernel.current_thread().id())
    }

    /// Thread holding the lock.
    #[must_use]
    pub fn holder(&self) -> Option<ThreadId> {
        self.queue.holder()
    }

    pub(crate) const fn kernel(&self) -> &Kernel {
        &self.kernel
    }
}
