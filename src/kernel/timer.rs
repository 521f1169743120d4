//! Timer interrupt hook.

/// Callback the simulated timer invokes every `timer_interval` ticks.
///
/// Runs outside any thread's logical context, so implementations must never
/// block; they may only make threads ready. A kernel accepts one live handler
/// at a time.
pub trait TimerInterrupt: Send + Sync {
    /// Handle one tick.
    fn timer_interrupt(&self);

    /// Whether a future tick can make some thread runnable. An idle machine
    /// only skips ahead to the next tick while this is `true`.
    fn pending(&self) -> bool;

    /// Earliest tick at which pending work becomes due, if known. An idle
    /// machine jumps straight to the first interrupt at or after it.
    fn next_deadline(&self) -> Option<u64> {
        None
    }
}
