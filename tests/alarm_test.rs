//! Alarm deadlines against the simulated clock.

use std::sync::Arc;

use parking_lot::Mutex;

use prometheus_kthreads::config::KernelConfig;
use prometheus_kthreads::kernel::Kernel;
use prometheus_kthreads::sync::Alarm;

const INTERVAL: u64 = 100;

fn config() -> KernelConfig {
    prometheus_kthreads::util::init_test_tracing();
    KernelConfig::new()
        .with_timer_interval(INTERVAL)
        .with_yield_ticks(10)
}

/// A thread waiting 1000 ticks is not woken early, and is woken on the first
/// tick at or after its deadline.
#[test]
fn test_wait_until_honors_deadline() {
    let (start, woke) = Kernel::run(config(), |kernel| {
        let alarm = Alarm::install(kernel).unwrap();
        let times = Arc::new(Mutex::new((0, 0)));

        let (sleeper_alarm, sleeper_times) = (Arc::clone(&alarm), Arc::clone(&times));
        let sleeper = kernel
            .fork("sleeper", move |k| {
                let start = k.now();
                sleeper_alarm.wait_until(1000);
                *sleeper_times.lock() = (start, k.now());
            })
            .unwrap();

        while kernel.stats().threads_finished == 0 {
            kernel.yield_now();
        }
        kernel.join(&sleeper).unwrap();
        let times = *times.lock();
        times
    })
    .unwrap();

    let deadline = start + 1000;
    assert!(woke >= deadline, "woke at {woke}, deadline {deadline}");
    assert!(woke - deadline < INTERVAL, "woke at {woke}, deadline {deadline}");
}

/// With nobody runnable the machine idles forward to the deadline.
#[test]
fn test_idle_machine_skips_to_deadline() {
    let stats = Kernel::run(config(), |kernel| {
        let alarm = Alarm::install(kernel).unwrap();
        alarm.wait_until(1000);
        assert_eq!(kernel.now(), 1000);
        assert_eq!(alarm.sleeping(), 0);
        kernel.stats()
    })
    .unwrap();
    assert_eq!(stats.idle_ticks, 1000);
    assert_eq!(stats.timer_interrupts, 10);
}

#[test]
fn test_sleepers_wake_in_deadline_order() {
    let order = Kernel::run(config(), |kernel| {
        let alarm = Alarm::install(kernel).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let threads: Vec<_> = [("a", 300), ("b", 100), ("c", 200), ("d", 100)]
            .into_iter()
            .map(|(name, ticks)| {
                let (alarm, log) = (Arc::clone(&alarm), Arc::clone(&log));
                kernel
                    .fork(name, move |_| {
                        alarm.wait_until(ticks);
                        log.lock().push(name);
                    })
                    .unwrap()
            })
            .collect();
        for thread in &threads {
            kernel.join(thread).unwrap();
        }
        let order = log.lock().clone();
        order
    })
    .unwrap();
    assert_eq!(order, vec!["b", "d", "c", "a"]);
}

#[test]
fn test_alarm_reinstalls_after_drop() {
    let result = Kernel::run(config(), |kernel| {
        let alarm = Alarm::install(kernel).unwrap();
        let installed_again = Alarm::install(kernel);
        assert!(installed_again.is_err());
        drop(alarm);
        let replacement = Alarm::install(kernel).unwrap();
        replacement.wait_until(50);
        kernel.now()
    })
    .unwrap();
    assert_eq!(result, INTERVAL);
}
