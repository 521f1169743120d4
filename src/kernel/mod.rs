//! Simulated uniprocessor running cooperative kernel threads.
//!
//! Every kernel thread is backed by a dedicated OS thread, but only one of
//! them ever executes simulated code: the CPU moves by explicit hand-off over
//! per-thread wake channels. The ready queue is an ordinary non-transferring
//! [`ResourceQueue`], so whichever policy the kernel was configured with also
//! decides who runs next.
//!
//! Threads park only inside kernel calls (`yield_now`, `sleep_with`, `join`
//! and the primitives built on them). When the machine halts, every parked
//! thread unwinds out of that call and its OS thread exits.

mod stats;
mod thread;
mod timer;

pub use stats::KernelStats;
pub use thread::{KThread, ThreadStatus};
pub use timer::TimerInterrupt;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::KernelConfig;
use crate::core::{ResourceQueue, Scheduler, SchedulerError, ThreadId};

use stats::KernelCounters;
use thread::{park, panic_message, Halted, ThreadEntry, Wake};

const MAIN_THREAD: ThreadId = ThreadId::new(0);

/// Mutable machine state. Taken before the scheduler graph lock, never after.
struct Machine {
    current: ThreadId,
    clock: u64,
    next_interrupt: u64,
    threads: HashMap<ThreadId, ThreadEntry>,
    handles: HashMap<ThreadId, JoinHandle<()>>,
    /// Finished threads that have handed off the CPU; their OS threads are
    /// exiting and can be joined.
    retired: Vec<ThreadId>,
    failure: Option<SchedulerError>,
}

impl Machine {
    fn entry(&self, thread: ThreadId) -> Result<&ThreadEntry, SchedulerError> {
        self.threads
            .get(&thread)
            .ok_or(SchedulerError::InvalidTransition {
                thread,
                reason: "unknown thread",
            })
    }

    fn entry_mut(&mut self, thread: ThreadId) -> Result<&mut ThreadEntry, SchedulerError> {
        self.threads
            .get_mut(&thread)
            .ok_or(SchedulerError::InvalidTransition {
                thread,
                reason: "unknown thread",
            })
    }

    fn set_status(&mut self, thread: ThreadId, status: ThreadStatus) {
        if let Some(entry) = self.threads.get_mut(&thread) {
            entry.status = status;
        }
    }
}

struct KernelInner {
    config: KernelConfig,
    scheduler: Scheduler,
    ready_queue: ResourceQueue,
    machine: Mutex<Machine>,
    timer: Mutex<Option<Weak<dyn TimerInterrupt>>>,
    counters: KernelCounters,
    next_thread_id: AtomicU64,
    halted: AtomicBool,
}

/// Handle to a running simulated machine. Cheap to clone.
///
/// Only valid inside [`Kernel::run`]; calls made after `run` returns act on
/// a halted machine.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let machine = self.inner.machine.lock();
        f.debug_struct("Kernel")
            .field("policy", &self.inner.config.policy)
            .field("current", &machine.current)
            .field("clock", &machine.clock)
            .field("threads", &machine.threads.len())
            .finish_non_exhaustive()
    }
}

impl Kernel {
    /// Boot a machine, run `body` as thread `main`, then halt and join every
    /// backing OS thread.
    ///
    /// Threads still ready or blocked when `body` returns are torn down.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if `config` fails validation
    /// - `SchedulerError::Deadlock` if some thread blocked with nothing
    ///   runnable and no pending timer work
    /// - `SchedulerError::ThreadPanicked` if a forked thread panicked
    ///
    /// # Panics
    ///
    /// A panic raised by `body` itself is resumed after the machine halts.
    pub fn run<T, F>(config: KernelConfig, body: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(&Self) -> T,
    {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let kernel = Self::boot(config);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&kernel)));
        kernel.halt();
        let failure = kernel.inner.machine.lock().failure.take();
        match (outcome, failure) {
            (_, Some(err)) => Err(err),
            (Ok(value), None) => Ok(value),
            (Err(payload), None) if payload.is::<Halted>() => Err(SchedulerError::Deadlock),
            (Err(payload), None) => panic::resume_unwind(payload),
        }
    }

    fn boot(config: KernelConfig) -> Self {
        let scheduler = Scheduler::from_config(&config);
        let ready_queue = scheduler.new_queue(false);
        ready_queue.acquire(MAIN_THREAD);

        let mut threads = HashMap::new();
        threads.insert(
            MAIN_THREAD,
            ThreadEntry::new(Arc::from("main"), ThreadStatus::Running),
        );

        info!(
            policy = ?config.policy,
            timer_interval = config.timer_interval,
            yield_ticks = config.yield_ticks,
            "kernel booted"
        );

        let next_interrupt = config.timer_interval;
        Self {
            inner: Arc::new(KernelInner {
                config,
                scheduler,
                ready_queue,
                machine: Mutex::new(Machine {
                    current: MAIN_THREAD,
                    clock: 0,
                    next_interrupt,
                    threads,
                    handles: HashMap::new(),
                    retired: Vec::new(),
                    failure: None,
                }),
                timer: Mutex::new(None),
                counters: KernelCounters::default(),
                next_thread_id: AtomicU64::new(1),
                halted: AtomicBool::new(false),
            }),
        }
    }

    /// Configuration the machine booted with.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    /// Scheduler shared by the ready queue and every primitive built on this
    /// kernel.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Current simulated time in ticks.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.inner.machine.lock().clock
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> KernelStats {
        let ticks = self.inner.machine.lock().clock;
        self.inner.counters.snapshot(ticks)
    }

    /// Thread holding the CPU.
    #[must_use]
    pub fn current_thread(&self) -> KThread {
        let machine = self.inner.machine.lock();
        let id = machine.current;
        let name = machine
            .threads
            .get(&id)
            .map_or_else(|| Arc::from("?"), |e| Arc::clone(&e.name));
        KThread::new(id, name)
    }

    fn current_id(&self) -> ThreadId {
        self.inner.machine.lock().current
    }

    /// Lifecycle state of `thread`. Threads retired after finishing report
    /// `Finished`.
    #[must_use]
    pub fn status(&self, thread: &KThread) -> Option<ThreadStatus> {
        let id = thread.id();
        match self.inner.machine.lock().threads.get(&id) {
            Some(entry) => Some(entry.status),
            None if id.get() < self.inner.next_thread_id.load(Ordering::Relaxed) => {
                Some(ThreadStatus::Finished)
            }
            None => None,
        }
    }

    /// Fork a thread at the default priority and make it ready.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Spawn` if the backing OS thread cannot be created.
    pub fn fork<F>(&self, name: impl Into<String>, body: F) -> Result<KThread, SchedulerError>
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        self.spawn_thread(name.into(), None, body)
    }

    /// Fork a thread with an explicit base priority and make it ready.
    ///
    /// # Errors
    ///
    /// `SchedulerError::PriorityOutOfRange` for a priority outside the policy
    /// bounds, `SchedulerError::Spawn` if the OS thread cannot be created.
    pub fn fork_with_priority<F>(
        &self,
        name: impl Into<String>,
        priority: u64,
        body: F,
    ) -> Result<KThread, SchedulerError>
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        self.spawn_thread(name.into(), Some(priority), body)
    }

    fn spawn_thread<F>(
        &self,
        name: String,
        priority: Option<u64>,
        body: F,
    ) -> Result<KThread, SchedulerError>
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let bounds = self.inner.scheduler.bounds();
        if let Some(p) = priority {
            if !bounds.contains(p) {
                return Err(SchedulerError::PriorityOutOfRange {
                    priority: p,
                    minimum: bounds.minimum,
                    maximum: bounds.maximum,
                });
            }
        }

        self.reap_retired();

        let id = ThreadId::new(self.inner.next_thread_id.fetch_add(1, Ordering::Relaxed));
        let name: Arc<str> = Arc::from(name);
        let entry = ThreadEntry::new(Arc::clone(&name), ThreadStatus::Ready);
        let wake_rx = entry.wake_rx.clone();

        let kernel = self.clone();
        let thread_name = Arc::clone(&name);
        let handle = std::thread::Builder::new()
            .name(format!("kthread-{}-{name}", id.get()))
            .stack_size(self.inner.config.thread_stack_size)
            .spawn(move || kernel.thread_main(id, &thread_name, &wake_rx, body))
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;

        {
            let mut machine = self.inner.machine.lock();
            machine.threads.insert(id, entry);
            machine.handles.insert(id, handle);
            if let Some(p) = priority {
                self.inner.scheduler.set_priority(id, p)?;
            }
            self.inner.ready_queue.wait_for_access(id)?;
        }

        self.inner
            .counters
            .threads_created
            .fetch_add(1, Ordering::Relaxed);
        debug!(thread = %id, name = %name, "thread forked");
        Ok(KThread::new(id, name))
    }

    /// Join the OS threads of retired kernel threads. Runs without the
    /// machine lock held.
    fn reap_retired(&self) {
        let handles: Vec<_> = {
            let mut machine = self.inner.machine.lock();
            let retired = std::mem::take(&mut machine.retired);
            retired
                .into_iter()
                .filter_map(|id| machine.handles.remove(&id))
                .collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn thread_main<F>(
        &self,
        id: ThreadId,
        name: &str,
        wake_rx: &crossbeam_channel::Receiver<Wake>,
        body: F,
    ) where
        F: FnOnce(&Self),
    {
        if wake_rx.recv() != Ok(Wake::Run) {
            return;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| body(self))) {
            Ok(()) => self.finish_current(id),
            Err(payload) if payload.is::<Halted>() => {}
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.fail(SchedulerError::ThreadPanicked {
                    name: name.to_string(),
                    message,
                });
            }
        }
    }

    /// Give up the CPU, charging `yield_ticks` to the clock. Returns
    /// immediately if no other thread is ready and the policy picks the
    /// caller again.
    pub fn yield_now(&self) {
        self.advance(self.inner.config.yield_ticks);
        let me = {
            let mut machine = self.inner.machine.lock();
            let me = machine.current;
            if let Err(err) = self.inner.ready_queue.wait_for_access(me) {
                error!(thread = %me, error = %err, "yield refused");
                return;
            }
            machine.set_status(me, ThreadStatus::Ready);
            me
        };
        self.run_next(me, false);
    }

    /// Block the current thread.
    ///
    /// `enqueue` runs with the current thread id, indivisibly with the
    /// transition to `Blocked`; it records the thread wherever its waker will
    /// find it. It must not call back into the kernel. If it fails, the
    /// thread stays running and the error is returned.
    ///
    /// # Errors
    ///
    /// Whatever `enqueue` returns.
    pub fn sleep_with<E, F>(&self, enqueue: F) -> Result<(), E>
    where
        F: FnOnce(ThreadId) -> Result<(), E>,
    {
        let me = {
            let mut machine = self.inner.machine.lock();
            let me = machine.current;
            enqueue(me)?;
            machine.set_status(me, ThreadStatus::Blocked);
            me
        };
        self.run_next(me, false);
        Ok(())
    }

    /// Move a blocked thread to the ready queue.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` if `thread` is unknown or not
    /// blocked, `SchedulerError::AlreadyWaiting` if it still waits on a
    /// resource queue.
    pub fn ready(&self, thread: ThreadId) -> Result<(), SchedulerError> {
        let mut machine = self.inner.machine.lock();
        self.ready_locked(&mut machine, thread)
    }

    fn ready_locked(&self, machine: &mut Machine, thread: ThreadId) -> Result<(), SchedulerError> {
        if machine.entry(thread)?.status != ThreadStatus::Blocked {
            return Err(SchedulerError::InvalidTransition {
                thread,
                reason: "thread is not blocked",
            });
        }
        self.inner.ready_queue.wait_for_access(thread)?;
        machine.entry_mut(thread)?.status = ThreadStatus::Ready;
        Ok(())
    }

    /// Wait for `target` to finish, donating priority to it meanwhile.
    /// Returns at once if it already finished.
    ///
    /// # Errors
    ///
    /// `SchedulerError::SelfJoin` when joining the current thread.
    pub fn join(&self, target: &KThread) -> Result<(), SchedulerError> {
        let target_id = target.id();
        let me = self.current_id();
        if me == target_id {
            return Err(SchedulerError::SelfJoin(me));
        }
        match self.status(target) {
            Some(ThreadStatus::Finished) => return Ok(()),
            Some(_) => {}
            None => {
                return Err(SchedulerError::InvalidTransition {
                    thread: target_id,
                    reason: "unknown thread",
                })
            }
        }
        let scheduler = &self.inner.scheduler;
        self.sleep_with(|me| scheduler.join(me, target_id))
    }

    fn finish_current(&self, me: ThreadId) {
        {
            let mut machine = self.inner.machine.lock();
            machine.set_status(me, ThreadStatus::Finished);
            for joiner in self.inner.scheduler.finish(me) {
                if let Err(err) = self.ready_locked(&mut machine, joiner) {
                    warn!(thread = %joiner, error = %err, "joiner could not be readied");
                }
            }
        }
        self.inner
            .counters
            .threads_finished
            .fetch_add(1, Ordering::Relaxed);
        debug!(thread = %me, "thread finished");
        self.run_next(me, true);
    }

    /// Base priority of `thread`.
    #[must_use]
    pub fn get_priority(&self, thread: &KThread) -> u64 {
        self.inner.scheduler.get_priority(thread.id())
    }

    /// Effective priority of `thread`.
    #[must_use]
    pub fn get_effective_priority(&self, thread: &KThread) -> u64 {
        self.inner.scheduler.get_effective_priority(thread.id())
    }

    /// Set the base priority of `thread`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::PriorityOutOfRange` outside the policy bounds.
    pub fn set_priority(&self, thread: &KThread, priority: u64) -> Result<(), SchedulerError> {
        self.inner.scheduler.set_priority(thread.id(), priority)
    }

    /// Raise the current thread's base priority by one. `false` at the bound.
    pub fn increase_priority(&self) -> bool {
        self.inner.scheduler.increase_priority(self.current_id())
    }

    /// Lower the current thread's base priority by one. `false` at the bound.
    pub fn decrease_priority(&self) -> bool {
        self.inner.scheduler.decrease_priority(self.current_id())
    }

    /// Register the timer interrupt handler.
    ///
    /// # Errors
    ///
    /// `SchedulerError::TimerHandlerInUse` while another handler is alive.
    pub fn set_timer_handler(
        &self,
        handler: Weak<dyn TimerInterrupt>,
    ) -> Result<(), SchedulerError> {
        let mut slot = self.inner.timer.lock();
        if slot.as_ref().is_some_and(|h| h.strong_count() > 0) {
            return Err(SchedulerError::TimerHandlerInUse);
        }
        *slot = Some(handler);
        Ok(())
    }

    fn timer_handler(&self) -> Option<Arc<dyn TimerInterrupt>> {
        self.inner.timer.lock().as_ref().and_then(Weak::upgrade)
    }

    fn deliver_interrupt(&self) {
        self.inner
            .counters
            .timer_interrupts
            .fetch_add(1, Ordering::Relaxed);
        if let Some(handler) = self.timer_handler() {
            handler.timer_interrupt();
        }
    }

    /// Charge `ticks` to the clock, firing the timer if an interrupt is due.
    fn advance(&self, ticks: u64) {
        let fired = {
            let mut machine = self.inner.machine.lock();
            machine.clock = machine.clock.saturating_add(ticks);
            let due = machine.clock >= machine.next_interrupt;
            if due {
                let interval = self.inner.config.timer_interval;
                let missed = (machine.clock - machine.next_interrupt) / interval + 1;
                machine.next_interrupt = machine
                    .next_interrupt
                    .saturating_add(missed.saturating_mul(interval));
            }
            due
        };
        if fired {
            self.deliver_interrupt();
        }
    }

    /// Skip ahead to the first timer interrupt at or after the handler's
    /// next deadline. `false` when no handler has pending work, which means
    /// nothing can ever become runnable again.
    fn idle(&self) -> bool {
        let Some(handler) = self.timer_handler().filter(|h| h.pending()) else {
            return false;
        };
        let deadline = handler.next_deadline();
        drop(handler);
        {
            let interval = self.inner.config.timer_interval;
            let mut machine = self.inner.machine.lock();
            // Interrupts between now and the deadline find nothing due.
            let quiet = deadline
                .filter(|&d| d > machine.next_interrupt)
                .map_or(0, |d| (d - machine.next_interrupt).div_ceil(interval));
            let target = machine
                .next_interrupt
                .saturating_add(quiet.saturating_mul(interval));
            let skipped = target.saturating_sub(machine.clock);
            machine.clock = target;
            machine.next_interrupt = target.saturating_add(interval);
            self.inner
                .counters
                .idle_ticks
                .fetch_add(skipped, Ordering::Relaxed);
            self.inner
                .counters
                .timer_interrupts
                .fetch_add(quiet, Ordering::Relaxed);
        }
        self.deliver_interrupt();
        true
    }

    /// Hand the CPU to the next ready thread and park `me` until it is
    /// scheduled again. A finishing thread does not park.
    fn run_next(&self, me: ThreadId, finishing: bool) {
        loop {
            if let Some(next) = self.inner.ready_queue.next_thread() {
                self.switch_to(me, next, finishing);
                return;
            }
            if !self.idle() {
                self.fail(SchedulerError::Deadlock);
                if finishing {
                    return;
                }
                panic::resume_unwind(Box::new(Halted));
            }
        }
    }

    fn switch_to(&self, me: ThreadId, next: ThreadId, finishing: bool) {
        let (next_tx, my_rx) = {
            let mut machine = self.inner.machine.lock();
            machine.current = next;
            machine.set_status(next, ThreadStatus::Running);
            if next == me {
                return;
            }
            let Some(next_entry) = machine.threads.get(&next) else {
                error!(thread = %next, "scheduled thread has no machine entry");
                return;
            };
            let next_tx = next_entry.wake_tx.clone();
            let my_rx = if finishing {
                machine.threads.remove(&me);
                machine.retired.push(me);
                None
            } else {
                machine.threads.get(&me).map(|e| e.wake_rx.clone())
            };
            (next_tx, my_rx)
        };

        self.inner
            .counters
            .context_switches
            .fetch_add(1, Ordering::Relaxed);
        debug!(from = %me, to = %next, "context switch");

        if next_tx.send(Wake::Run).is_err() {
            self.fail(SchedulerError::InvalidTransition {
                thread: next,
                reason: "backing thread exited",
            });
        }
        if let Some(rx) = my_rx {
            park(&rx);
        }
    }

    /// Record `err`, stop the machine and wake every parked thread so it
    /// unwinds.
    fn fail(&self, err: SchedulerError) {
        error!(error = %err, "kernel halting on failure");
        {
            let mut machine = self.inner.machine.lock();
            if machine.failure.is_none() {
                machine.failure = Some(err);
            }
        }
        self.broadcast_halt();
    }

    fn broadcast_halt(&self) {
        self.inner.halted.store(true, Ordering::Release);
        let senders: Vec<_> = {
            let machine = self.inner.machine.lock();
            machine
                .threads
                .values()
                .filter(|e| e.status != ThreadStatus::Finished)
                .map(|e| e.wake_tx.clone())
                .collect()
        };
        for tx in senders {
            let _ = tx.send(Wake::Halt);
        }
    }

    /// Whether the machine has stopped.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::Acquire)
    }

    fn halt(&self) {
        self.broadcast_halt();
        let handles = {
            let mut machine = self.inner.machine.lock();
            machine.retired.clear();
            std::mem::take(&mut machine.handles)
        };
        let joined = handles.len();
        for handle in handles.into_values() {
            let _ = handle.join();
        }
        let stats = self.stats();
        info!(
            ticks = stats.ticks,
            context_switches = stats.context_switches,
            threads_joined = joined,
            "kernel halted"
        );
    }
}
