//! Kernel statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Snapshot of kernel activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelStats {
    /// Simulated clock.
    pub ticks: u64,
    /// Ticks skipped while no thread was runnable.
    pub idle_ticks: u64,
    /// Timer interrupts delivered.
    pub timer_interrupts: u64,
    /// Hand-offs of the CPU to a different thread.
    pub context_switches: u64,
    /// Threads forked.
    pub threads_created: u64,
    /// Threads whose body returned.
    pub threads_finished: u64,
}

/// Internal counters (lock-free atomics).
#[derive(Debug, Default)]
pub(crate) struct KernelCounters {
    pub idle_ticks: AtomicU64,
    pub timer_interrupts: AtomicU64,
    pub context_switches: AtomicU64,
    pub threads_created: AtomicU64,
    pub threads_finished: AtomicU64,
}

impl KernelCounters {
    pub fn snapshot(&self, ticks: u64) -> KernelStats {
        KernelStats {
            ticks,
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            timer_interrupts: self.timer_interrupts.load(Ordering::Relaxed),
            context_switches: self.context_switches.load(Ordering::Relaxed),
            threads_created: self.threads_created.load(Ordering::Relaxed),
            threads_finished: self.threads_finished.load(Ordering::Relaxed),
        }
    }
}
