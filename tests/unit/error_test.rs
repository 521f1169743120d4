//! Tests for error types

use prometheus_kthreads::core::{SchedulerError, ThreadId};

#[test]
fn test_priority_out_of_range_error() {
    let err = SchedulerError::PriorityOutOfRange {
        priority: 9,
        minimum: 0,
        maximum: 7,
    };
    assert_eq!(format!("{}", err), "priority 9 outside [0, 7]");
}

#[test]
fn test_lock_errors() {
    assert_eq!(
        format!("{}", SchedulerError::LockNotHeld),
        "lock not held by current thread"
    );
    assert_eq!(
        format!("{}", SchedulerError::LockAlreadyHeld),
        "lock already held by current thread"
    );
}

#[test]
fn test_self_join_error() {
    let err = SchedulerError::SelfJoin(ThreadId::new(4));
    assert_eq!(format!("{}", err), "thread t4 cannot join itself");
}

#[test]
fn test_thread_panicked_error() {
    let err = SchedulerError::ThreadPanicked {
        name: "worker".to_string(),
        message: "boom".to_string(),
    };
    assert_eq!(format!("{}", err), "thread `worker` panicked: boom");
}

#[test]
fn test_deadlock_error() {
    assert_eq!(
        format!("{}", SchedulerError::Deadlock),
        "deadlock: no runnable threads and no pending timer work"
    );
}
