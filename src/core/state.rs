//! Per-thread scheduling state and identifiers.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a kernel thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Identity of a resource queue within one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(u64);

impl QueueId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Scheduling record attached to a thread on its first scheduler interaction.
#[derive(Debug, Clone)]
pub(crate) struct SchedulingState {
    pub(crate) base: u64,
    /// Derived; never below `base`.
    pub(crate) effective: u64,
    /// Donation each held transferring queue currently contributes.
    pub(crate) held: HashMap<QueueId, u64>,
    pub(crate) waiting_on: Option<QueueId>,
    /// Implicit queue joiners wait on; this thread holds it until finish.
    pub(crate) join_queue: Option<QueueId>,
}

impl SchedulingState {
    pub(crate) fn new(base: u64) -> Self {
        Self {
            base,
            effective: base,
            held: HashMap::new(),
            waiting_on: None,
            join_queue: None,
        }
    }

    /// Inputs to the effective-priority aggregate: the base first, then
    /// every donation.
    pub(crate) fn contributions(&self) -> Vec<u64> {
        let mut values = Vec::with_capacity(self.held.len() + 1);
        values.push(self.base);
        values.extend(self.held.values().copied());
        values
    }

    pub(crate) fn snapshot(&self, thread: ThreadId) -> ThreadSnapshot {
        let mut held: Vec<(QueueId, u64)> = self.held.iter().map(|(q, v)| (*q, *v)).collect();
        held.sort_unstable();
        ThreadSnapshot {
            thread,
            priority: self.base,
            effective_priority: self.effective,
            held,
            waiting_on: self.waiting_on,
        }
    }
}

/// Read-only copy of a thread's scheduling state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// Thread described.
    pub thread: ThreadId,
    /// Base priority.
    pub priority: u64,
    /// Effective priority including donations.
    pub effective_priority: u64,
    /// Held transferring queues and the donation each contributes, sorted by queue.
    pub held: Vec<(QueueId, u64)>,
    /// Queue the thread is blocked on, if any.
    pub waiting_on: Option<QueueId>,
}
