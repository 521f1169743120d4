//! Counting semaphore.

use parking_lot::Mutex;

use crate::core::{ResourceQueue, SchedulerError};
use crate::kernel::Kernel;

/// Counting semaphore. Waiters do not donate priority; `v` hands its permit
/// directly to the waiter the policy picks.
#[derive(Debug)]
pub struct Semaphore {
    kernel: Kernel,
    queue: ResourceQueue,
    permits: Mutex<u64>,
}

impl Semaphore {
    /// Create a semaphore holding `permits`.
    #[must_use]
    pub fn new(kernel: &Kernel, permits: u64) -> Self {
        Self {
            kernel: kernel.clone(),
            queue: kernel.scheduler().new_queue(false),
            permits: Mutex::new(permits),
        }
    }

    /// Take a permit, blocking until one is available.
    ///
    /// # Errors
    ///
    /// Propagates queue misuse from the scheduler.
    pub fn p(&self) -> Result<(), SchedulerError> {
        {
            let mut permits = self.permits.lock();
            if *permits > 0 {
                *permits -= 1;
                return Ok(());
            }
        }
        self.kernel.sleep_with(|me| self.queue.wait_for_access(me))
    }

    /// Return a permit, waking one waiter if any.
    ///
    /// # Errors
    ///
    /// Propagates a failed wake-up from the kernel.
    pub fn v(&self) -> Result<(), SchedulerError> {
        match self.queue.next_thread() {
            Some(next) => self.kernel.ready(next),
            None => {
                *self.permits.lock() += 1;
                Ok(())
            }
        }
    }

    /// Permits currently available.
    #[must_use]
    pub fn available(&self) -> u64 {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use std::sync::Arc;

    #[test]
    fn test_permits_count_down_and_up() {
        Kernel::run(KernelConfig::new(), |kernel| {
            let sem = Semaphore::new(kernel, 2);
            sem.p().unwrap();
            sem.p().unwrap();
            assert_eq!(sem.available(), 0);
            sem.v().unwrap();
            assert_eq!(sem.available(), 1);
        })
        .unwrap();
    }

    #[test]
    fn test_v_wakes_blocked_thread() {
        let done = Kernel::run(KernelConfig::new(), |kernel| {
            let sem = Arc::new(Semaphore::new(kernel, 0));
            let waiter_sem = Arc::clone(&sem);
            let waiter = kernel
                .fork("waiter", move |_| waiter_sem.p().unwrap())
                .unwrap();
            kernel.yield_now();
            sem.v().unwrap();
            assert_eq!(sem.available(), 0);
            kernel.join(&waiter).unwrap();
            kernel.stats().threads_finished
        })
        .unwrap();
        assert_eq!(done, 1);
    }
}
