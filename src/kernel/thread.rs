//! Kernel thread handles and lifecycle states.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::core::ThreadId;

/// Lifecycle of a kernel thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    /// In the ready queue, waiting for the CPU.
    Ready,
    /// Currently holds the CPU.
    Running,
    /// Parked until another thread (or the timer) makes it ready.
    Blocked,
    /// Body returned; joiners have been released.
    Finished,
}

/// Handle to a kernel thread.
#[derive(Clone, PartialEq, Eq)]
pub struct KThread {
    id: ThreadId,
    name: Arc<str>,
}

impl KThread {
    pub(crate) const fn new(id: ThreadId, name: Arc<str>) -> Self {
        Self { id, name }
    }

    /// Thread identity.
    #[must_use]
    pub const fn id(&self) -> ThreadId {
        self.id
    }

    /// Thread name given at fork.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for KThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

impl fmt::Display for KThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Message delivered on a thread's wake channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// Take the CPU.
    Run,
    /// The machine stopped; unwind and exit.
    Halt,
}

/// Unwind payload used to tear down threads parked when the machine halts.
pub(crate) struct Halted;

/// Machine-side record of a thread.
pub(crate) struct ThreadEntry {
    pub(crate) name: Arc<str>,
    pub(crate) status: ThreadStatus,
    pub(crate) wake_tx: Sender<Wake>,
    pub(crate) wake_rx: Receiver<Wake>,
}

impl ThreadEntry {
    pub(crate) fn new(name: Arc<str>, status: ThreadStatus) -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
        Self {
            name,
            status,
            wake_tx,
            wake_rx,
        }
    }
}

/// Park on `rx` until told to run; unwinds the calling thread on halt.
pub(crate) fn park(rx: &Receiver<Wake>) {
    match rx.recv() {
        Ok(Wake::Run) => {}
        Ok(Wake::Halt) | Err(_) => std::panic::resume_unwind(Box::new(Halted)),
    }
}

/// Render a panic payload for error reporting.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
