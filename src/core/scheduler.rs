//! Donation-aware scheduler and the resource queues locks are built on.
//!
//! A [`Scheduler`] owns the whole donation graph: one [`SchedulingState`] per
//! thread and one queue record per [`ResourceQueue`]. The graph sits behind a
//! single `parking_lot::Mutex`, not one lock per queue, because a priority
//! change walks `waiting_on -> holder` links across several queues and that
//! walk must look atomic to every observer.
//!
//! Donated values are cached per held queue (`held[q]`) and refreshed
//! incrementally: a change to one thread's effective priority only touches
//! the chain of holders downstream of it, and the walk stops at the first
//! holder whose effective priority does not move.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::KernelConfig;
use crate::core::policy::{Policy, PolicyKind, PriorityBounds};
use crate::core::state::{QueueId, SchedulingState, ThreadId, ThreadSnapshot};
use crate::core::SchedulerError;

/// Waiters, holder and donation flag of one queue.
#[derive(Debug)]
struct QueueState {
    transfers: bool,
    /// Insertion order is significant for tie-breaks.
    waiters: Vec<ThreadId>,
    holder: Option<ThreadId>,
}

/// Everything guarded by the scheduler lock.
struct Graph {
    policy: Box<dyn Policy>,
    bounds: PriorityBounds,
    threads: HashMap<ThreadId, SchedulingState>,
    queues: HashMap<QueueId, QueueState>,
    next_queue: u64,
}

impl Graph {
    fn new(policy: Box<dyn Policy>) -> Self {
        let bounds = policy.bounds();
        Self {
            policy,
            bounds,
            threads: HashMap::new(),
            queues: HashMap::new(),
            next_queue: 0,
        }
    }

    fn state_mut(&mut self, thread: ThreadId) -> &mut SchedulingState {
        let default = self.bounds.default;
        self.threads
            .entry(thread)
            .or_insert_with(|| SchedulingState::new(default))
    }

    fn effective_of(&self, thread: ThreadId) -> u64 {
        self.threads
            .get(&thread)
            .map_or(self.bounds.default, |s| s.effective)
    }

    fn register_queue(&mut self, transfers: bool) -> QueueId {
        let id = QueueId::new(self.next_queue);
        self.next_queue += 1;
        self.queues.insert(
            id,
            QueueState {
                transfers,
                waiters: Vec::new(),
                holder: None,
            },
        );
        id
    }

    fn unregister_queue(&mut self, queue: QueueId) {
        let Some(record) = self.queues.remove(&queue) else {
            return;
        };
        for waiter in record.waiters {
            if let Some(state) = self.threads.get_mut(&waiter) {
                if state.waiting_on == Some(queue) {
                    state.waiting_on = None;
                }
            }
        }
        if let Some(holder) = record.holder {
            self.drop_entry(holder, queue);
        }
    }

    fn weights(&self, queue: &QueueState) -> Vec<u64> {
        queue.waiters.iter().map(|t| self.effective_of(*t)).collect()
    }

    /// Aggregate of the waiters' effective priorities, or the identity if the
    /// queue does not transfer.
    fn donation(&self, queue: QueueId) -> u64 {
        match self.queues.get(&queue) {
            Some(record) if record.transfers => self.policy.aggregate(&self.weights(record)),
            _ => 0,
        }
    }

    /// Recompute the donation `queue` makes to its holder and store it in the
    /// holder's `held` map. Returns the holder when a donation was written.
    fn update_donation(&mut self, queue: QueueId) -> Option<ThreadId> {
        let record = self.queues.get(&queue)?;
        if !record.transfers {
            return None;
        }
        let holder = record.holder?;
        let donation = self.policy.aggregate(&self.weights(record));
        self.state_mut(holder).held.insert(queue, donation);
        Some(holder)
    }

    /// Remove `queue`'s donation entry from `holder` and re-derive its
    /// effective priority from what it still holds.
    fn drop_entry(&mut self, holder: ThreadId, queue: QueueId) {
        let Some(state) = self.threads.get_mut(&holder) else {
            return;
        };
        if state.join_queue == Some(queue) {
            state.join_queue = None;
        }
        if state.held.remove(&queue).is_some() {
            self.refresh(holder);
        }
    }

    /// Re-derive `start`'s effective priority and push any change down the
    /// chain of holders it (transitively) waits behind.
    fn refresh(&mut self, start: ThreadId) {
        let limit = self.threads.len() + 1;
        let mut current = start;
        for _ in 0..=limit {
            let Some(state) = self.threads.get(&current) else {
                return;
            };
            let effective = self.policy.aggregate(&state.contributions());
            let previous = state.effective;
            let waiting_on = state.waiting_on;
            if effective == previous {
                return;
            }
            self.state_mut(current).effective = effective;
            tracing::debug!(
                thread = %current,
                from = previous,
                to = effective,
                "effective priority changed"
            );
            let Some(queue) = waiting_on else {
                return;
            };
            match self.update_donation(queue) {
                Some(holder) => current = holder,
                None => return,
            }
        }
        tracing::error!(
            thread = %start,
            "donation walk exceeded live thread count; donation graph has a cycle"
        );
    }

    /// Take `thread` out of the waiter list it is blocked on, if any.
    fn leave_waiting(&mut self, thread: ThreadId) {
        let Some(queue) = self
            .threads
            .get_mut(&thread)
            .and_then(|s| s.waiting_on.take())
        else {
            return;
        };
        if let Some(record) = self.queues.get_mut(&queue) {
            record.waiters.retain(|t| *t != thread);
        }
        if let Some(holder) = self.update_donation(queue) {
            self.refresh(holder);
        }
    }

    fn wait_for_access(&mut self, queue: QueueId, thread: ThreadId) -> Result<(), SchedulerError> {
        if let Some(existing) = self.state_mut(thread).waiting_on {
            return Err(SchedulerError::AlreadyWaiting {
                thread,
                queue: existing,
            });
        }
        let Some(record) = self.queues.get_mut(&queue) else {
            return Ok(());
        };
        record.waiters.push(thread);
        self.state_mut(thread).waiting_on = Some(queue);
        if let Some(holder) = self.update_donation(queue) {
            self.refresh(holder);
        }
        Ok(())
    }

    /// Make `thread` the holder of `queue` without touching what it waits on.
    fn take_ownership(&mut self, queue: QueueId, thread: ThreadId) {
        let Some(record) = self.queues.get_mut(&queue) else {
            return;
        };
        let previous = record.holder.replace(thread);
        if let Some(old) = previous.filter(|old| *old != thread) {
            self.drop_entry(old, queue);
        }
        self.state_mut(thread);
        if self.update_donation(queue).is_some() {
            self.refresh(thread);
        }
    }

    fn acquire(&mut self, queue: QueueId, thread: ThreadId) {
        self.leave_waiting(thread);
        self.take_ownership(queue, thread);
    }

    fn next_thread(&mut self, queue: QueueId) -> Option<ThreadId> {
        let holder = self.queues.get_mut(&queue)?.holder.take();
        if let Some(holder) = holder {
            self.drop_entry(holder, queue);
        }
        let weights = self.weights(self.queues.get(&queue)?);
        let idx = self.policy.pick(&weights)?;
        let winner = self.queues.get_mut(&queue)?.waiters.remove(idx);
        self.acquire(queue, winner);
        tracing::debug!(queue = %queue, thread = %winner, "queue handed to next thread");
        Some(winner)
    }

    fn set_priority(&mut self, thread: ThreadId, priority: u64) -> Result<(), SchedulerError> {
        if !self.bounds.contains(priority) {
            return Err(SchedulerError::PriorityOutOfRange {
                priority,
                minimum: self.bounds.minimum,
                maximum: self.bounds.maximum,
            });
        }
        let state = self.state_mut(thread);
        if state.base == priority {
            return Ok(());
        }
        state.base = priority;
        self.refresh(thread);
        Ok(())
    }

    fn join(&mut self, joiner: ThreadId, target: ThreadId) -> Result<QueueId, SchedulerError> {
        if joiner == target {
            return Err(SchedulerError::SelfJoin(joiner));
        }
        let queue = if let Some(queue) = self.state_mut(target).join_queue {
            queue
        } else {
            let queue = self.register_queue(true);
            self.take_ownership(queue, target);
            self.state_mut(target).join_queue = Some(queue);
            queue
        };
        self.wait_for_access(queue, joiner)?;
        Ok(queue)
    }

    fn finish(&mut self, thread: ThreadId) -> Vec<ThreadId> {
        if !self.threads.contains_key(&thread) {
            return Vec::new();
        }
        self.leave_waiting(thread);

        let mut joiners = Vec::new();
        if let Some(join_queue) = self.threads.get(&thread).and_then(|s| s.join_queue) {
            if let Some(record) = self.queues.remove(&join_queue) {
                for waiter in record.waiters {
                    if let Some(state) = self.threads.get_mut(&waiter) {
                        state.waiting_on = None;
                    }
                    joiners.push(waiter);
                }
            }
        }

        for record in self.queues.values_mut() {
            if record.holder == Some(thread) {
                record.holder = None;
            }
        }
        self.threads.remove(&thread);
        joiners
    }
}

/// Priority/lottery scheduler with donation through resource queues.
///
/// Cloning yields another handle onto the same donation graph.
///
/// # Examples
///
/// ```
/// use prometheus_kthreads::core::{PolicyKind, Scheduler, ThreadId};
///
/// let scheduler = Scheduler::new(PolicyKind::Priority.build(None));
/// let lock = scheduler.new_queue(true);
/// let (low, high) = (ThreadId::new(1), ThreadId::new(2));
///
/// scheduler.set_priority(low, 1).unwrap();
/// scheduler.set_priority(high, 7).unwrap();
/// lock.acquire(low);
/// lock.wait_for_access(high).unwrap();
/// assert_eq!(scheduler.get_effective_priority(low), 7);
///
/// assert_eq!(lock.next_thread(), Some(high));
/// assert_eq!(scheduler.get_effective_priority(low), 1);
/// ```
#[derive(Clone)]
pub struct Scheduler {
    graph: Arc<Mutex<Graph>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = self.graph.lock();
        f.debug_struct("Scheduler")
            .field("policy", &graph.policy.kind())
            .field("threads", &graph.threads.len())
            .field("queues", &graph.queues.len())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler running `policy`.
    #[must_use]
    pub fn new(policy: Box<dyn Policy>) -> Self {
        Self {
            graph: Arc::new(Mutex::new(Graph::new(policy))),
        }
    }

    /// Create a scheduler from kernel configuration.
    #[must_use]
    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new(config.policy.build(config.seed))
    }

    /// Active policy.
    #[must_use]
    pub fn policy_kind(&self) -> PolicyKind {
        self.graph.lock().policy.kind()
    }

    /// Priority bounds of the active policy.
    #[must_use]
    pub fn bounds(&self) -> PriorityBounds {
        self.graph.lock().bounds
    }

    /// Allocate a queue. With `transfers`, waiters donate to the holder.
    #[must_use]
    pub fn new_queue(&self, transfers: bool) -> ResourceQueue {
        let id = self.graph.lock().register_queue(transfers);
        ResourceQueue {
            inner: Arc::new(QueueHandle {
                id,
                transfers,
                graph: Arc::clone(&self.graph),
            }),
        }
    }

    /// Base priority of `thread`.
    #[must_use]
    pub fn get_priority(&self, thread: ThreadId) -> u64 {
        let graph = self.graph.lock();
        graph
            .threads
            .get(&thread)
            .map_or(graph.bounds.default, |s| s.base)
    }

    /// Effective priority of `thread`, donations included.
    #[must_use]
    pub fn get_effective_priority(&self, thread: ThreadId) -> u64 {
        self.graph.lock().effective_of(thread)
    }

    /// Set the base priority of `thread` and propagate the change.
    ///
    /// # Errors
    ///
    /// `SchedulerError::PriorityOutOfRange` if `priority` is outside the
    /// policy bounds.
    pub fn set_priority(&self, thread: ThreadId, priority: u64) -> Result<(), SchedulerError> {
        self.graph.lock().set_priority(thread, priority)
    }

    /// Raise the base priority by one. Returns `false` at the maximum.
    pub fn increase_priority(&self, thread: ThreadId) -> bool {
        let mut graph = self.graph.lock();
        let maximum = graph.bounds.maximum;
        let current = graph.state_mut(thread).base;
        if current >= maximum {
            return false;
        }
        graph.set_priority(thread, current + 1).is_ok()
    }

    /// Lower the base priority by one. Returns `false` at the minimum.
    pub fn decrease_priority(&self, thread: ThreadId) -> bool {
        let mut graph = self.graph.lock();
        let minimum = graph.bounds.minimum;
        let current = graph.state_mut(thread).base;
        if current <= minimum {
            return false;
        }
        graph.set_priority(thread, current - 1).is_ok()
    }

    /// Record that `joiner` waits for `target` to finish; `joiner` donates
    /// into `target` until [`Scheduler::finish`] is called for `target`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::SelfJoin` when both are the same thread and
    /// `SchedulerError::AlreadyWaiting` when `joiner` is blocked elsewhere.
    pub fn join(&self, joiner: ThreadId, target: ThreadId) -> Result<(), SchedulerError> {
        self.graph.lock().join(joiner, target).map(|_| ())
    }

    /// Unwind every donation `thread` takes part in and drop its state.
    ///
    /// Returns the threads that were joined on it, in join order; the caller
    /// is responsible for making them runnable.
    pub fn finish(&self, thread: ThreadId) -> Vec<ThreadId> {
        self.graph.lock().finish(thread)
    }

    /// Copy of `thread`'s scheduling state, if it has one.
    #[must_use]
    pub fn snapshot(&self, thread: ThreadId) -> Option<ThreadSnapshot> {
        self.graph
            .lock()
            .threads
            .get(&thread)
            .map(|s| s.snapshot(thread))
    }

    /// Number of threads with live scheduling state.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.graph.lock().threads.len()
    }
}

struct QueueHandle {
    id: QueueId,
    transfers: bool,
    graph: Arc<Mutex<Graph>>,
}

impl Drop for QueueHandle {
    fn drop(&mut self) {
        self.graph.lock().unregister_queue(self.id);
    }
}

/// Ordered wait list with an optional holder, the building block of locks
/// and semaphores.
///
/// Cloning yields another handle to the same queue; the queue leaves the
/// donation graph when the last handle is dropped.
#[derive(Clone)]
pub struct ResourceQueue {
    inner: Arc<QueueHandle>,
}

impl std::fmt::Debug for ResourceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceQueue")
            .field("id", &self.inner.id)
            .field("transfers", &self.inner.transfers)
            .finish()
    }
}

impl ResourceQueue {
    /// Queue identity.
    #[must_use]
    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    /// Whether waiters donate to the holder.
    #[must_use]
    pub fn transfers(&self) -> bool {
        self.inner.transfers
    }

    /// Enqueue `thread` as a waiter. Donation to the holder takes effect
    /// immediately.
    ///
    /// # Errors
    ///
    /// `SchedulerError::AlreadyWaiting` if `thread` waits on another queue.
    pub fn wait_for_access(&self, thread: ThreadId) -> Result<(), SchedulerError> {
        self.inner.graph.lock().wait_for_access(self.inner.id, thread)
    }

    /// Make `thread` the holder without it having waited.
    pub fn acquire(&self, thread: ThreadId) {
        self.inner.graph.lock().acquire(self.inner.id, thread);
    }

    /// Release the current holder and hand the queue to the next waiter.
    ///
    /// Returns `None` when nobody is waiting; the queue is then unheld.
    #[must_use = "the returned thread now holds the queue and must be made runnable"]
    pub fn next_thread(&self) -> Option<ThreadId> {
        self.inner.graph.lock().next_thread(self.inner.id)
    }

    /// Current holder.
    #[must_use]
    pub fn holder(&self) -> Option<ThreadId> {
        self.inner
            .graph
            .lock()
            .queues
            .get(&self.inner.id)
            .and_then(|q| q.holder)
    }

    /// Waiters in enqueue order.
    #[must_use]
    pub fn waiters(&self) -> Vec<ThreadId> {
        self.inner
            .graph
            .lock()
            .queues
            .get(&self.inner.id)
            .map(|q| q.waiters.clone())
            .unwrap_or_default()
    }

    /// Number of waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .graph
            .lock()
            .queues
            .get(&self.inner.id)
            .map_or(0, |q| q.waiters.len())
    }

    /// Whether nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Donation this queue currently makes to its holder.
    #[must_use]
    pub fn donation(&self) -> u64 {
        self.inner.graph.lock().donation(self.inner.id)
    }
}
