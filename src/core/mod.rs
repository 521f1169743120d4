//! Core scheduling abstractions: policies, per-thread state and the donation graph.

pub mod error;
pub mod policy;
pub mod scheduler;
pub mod state;

pub use error::{AppResult, SchedulerError};
pub use policy::{LotteryPolicy, Policy, PolicyKind, PriorityBounds, PriorityPolicy};
pub use scheduler::{ResourceQueue, Scheduler};
pub use state::{QueueId, ThreadId, ThreadSnapshot};
