//! Timer-driven sleep.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::{SchedulerError, ThreadId};
use crate::kernel::{Kernel, TimerInterrupt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Sleeper {
    deadline: u64,
    seq: u64,
    thread: ThreadId,
}

/// Deadline-ordered sleep service driven by the kernel timer.
///
/// Installed once per kernel as its timer interrupt handler; the kernel keeps
/// only a weak reference, so dropping the last `Arc` uninstalls it.
#[derive(Debug)]
pub struct Alarm {
    kernel: Kernel,
    sleepers: Mutex<BinaryHeap<Reverse<Sleeper>>>,
    seq: AtomicU64,
}

impl Alarm {
    /// Create an alarm and register it as `kernel`'s timer handler.
    ///
    /// # Errors
    ///
    /// `SchedulerError::TimerHandlerInUse` if another handler is installed.
    pub fn install(kernel: &Kernel) -> Result<Arc<Self>, SchedulerError> {
        let alarm = Arc::new(Self {
            kernel: kernel.clone(),
            sleepers: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        });
        let handler: Weak<Self> = Arc::downgrade(&alarm);
        kernel.set_timer_handler(handler)?;
        Ok(alarm)
    }

    /// Block the current thread until at least `ticks` from now.
    ///
    /// The thread always blocks, even for `ticks <= 0`; it is woken by the
    /// first timer interrupt at or after the deadline.
    pub fn wait_until(&self, ticks: i64) {
        let deadline = self.kernel.now().saturating_add_signed(ticks);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let Ok(()) = self.kernel.sleep_with(|thread| {
            self.sleepers.lock().push(Reverse(Sleeper {
                deadline,
                seq,
                thread,
            }));
            Ok::<(), Infallible>(())
        });
    }

    /// Threads currently asleep.
    #[must_use]
    pub fn sleeping(&self) -> usize {
        self.sleepers.lock().len()
    }
}

impl TimerInterrupt for Alarm {
    fn timer_interrupt(&self) {
        let now = self.kernel.now();
        let due: Vec<Sleeper> = {
            let mut sleepers = self.sleepers.lock();
            let mut due = Vec::new();
            while sleepers.peek().is_some_and(|Reverse(s)| s.deadline <= now) {
                if let Some(Reverse(sleeper)) = sleepers.pop() {
                    due.push(sleeper);
                }
            }
            due
        };
        for sleeper in due {
            debug!(thread = %sleeper.thread, deadline = sleeper.deadline, now, "alarm wake");
            if let Err(err) = self.kernel.ready(sleeper.thread) {
                warn!(thread = %sleeper.thread, error = %err, "alarm could not wake thread");
            }
        }
    }

    fn pending(&self) -> bool {
        !self.sleepers.lock().is_empty()
    }

    fn next_deadline(&self) -> Option<u64> {
        self.sleepers.lock().peek().map(|Reverse(s)| s.deadline)
    }
}
