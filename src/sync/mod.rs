//! Synchronization primitives built on the kernel and its scheduler.
//!
//! [`Lock`] and [`Semaphore`] sit directly on resource queues; the rest are
//! composed from a lock and the kernel's block/ready primitives.

pub mod alarm;
pub mod communicator;
pub mod condition;
pub mod lock;
pub mod semaphore;

pub use alarm::Alarm;
pub use communicator::Communicator;
pub use condition::Condition;
pub use lock::Lock;
pub use semaphore::Semaphore;
