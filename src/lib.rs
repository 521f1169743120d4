//! # Prometheus Kernel Threads
//!
//! A cooperative, single-CPU thread scheduler with priority donation, and the
//! synchronization primitives built on it.
//!
//! The scheduler keeps a donation graph: which thread waits on which resource
//! queue, and how much priority (or how many lottery tickets) flows back to
//! each holder. Effective priorities are recomputed incrementally whenever the
//! graph changes. Two policies plug into the same queue machinery:
//!
//! - **Priority**: donations aggregate by `max`; the highest effective
//!   priority wins, ties go to the longest waiter.
//! - **Lottery**: donations aggregate by `sum`; winners are drawn with
//!   probability proportional to their tickets.
//!
//! ## Layers
//!
//! - [`core`]: policies, per-thread scheduling state, [`core::Scheduler`] and
//!   [`core::ResourceQueue`]. Usable on its own, without any threads.
//! - [`kernel`]: a simulated uniprocessor. Each kernel thread is backed by an
//!   OS thread, but only one runs at a time; the ready queue is a resource
//!   queue of the kernel's scheduler.
//! - [`sync`]: [`sync::Lock`], [`sync::Semaphore`], [`sync::Condition`],
//!   [`sync::Alarm`] and [`sync::Communicator`].
//!
//! ## Example
//!
//! ```rust
//! use prometheus_kthreads::config::KernelConfig;
//! use prometheus_kthreads::kernel::Kernel;
//! use prometheus_kthreads::sync::Lock;
//!
//! let holder_priority = Kernel::run(KernelConfig::new(), |kernel| {
//!     let lock = Lock::new(kernel);
//!     lock.acquire().unwrap();
//!
//!     let waiter_lock = lock.clone();
//!     kernel
//!         .fork_with_priority("urgent", 7, move |_| {
//!             waiter_lock.acquire().unwrap();
//!             waiter_lock.release().unwrap();
//!         })
//!         .unwrap();
//!     kernel.yield_now();
//!
//!     // `urgent` is blocked on the lock and donates to main.
//!     let priority = kernel.get_effective_priority(&kernel.current_thread());
//!     lock.release().unwrap();
//!     priority
//! })
//! .unwrap();
//! assert_eq!(holder_priority, 7);
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Scheduling policies, donation graph and resource queues.
pub mod core;
/// Kernel configuration.
pub mod config;
/// Simulated uniprocessor and kernel threads.
pub mod kernel;
/// Locks, semaphores, condition variables, alarms and rendezvous channels.
pub mod sync;
/// Shared utilities.
pub mod util;

pub use crate::config::KernelConfig;
pub use crate::core::{PolicyKind, ResourceQueue, Scheduler, SchedulerError, ThreadId};
pub use crate::kernel::{KThread, Kernel};
