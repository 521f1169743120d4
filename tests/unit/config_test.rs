//! Tests for kernel configuration loading and validation

use std::io::Write;

use prometheus_kthreads::config::KernelConfig;
use prometheus_kthreads::core::PolicyKind;

#[test]
fn test_defaults_validate() {
    assert!(KernelConfig::default().validate().is_ok());
}

#[test]
fn test_zero_timer_interval_rejected() {
    let cfg = KernelConfig::new().with_timer_interval(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_yield_ticks_rejected() {
    let cfg = KernelConfig::new().with_yield_ticks(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_tiny_stack_rejected() {
    let cfg = KernelConfig::new().with_thread_stack_size(4096);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_json_partial_fields_use_defaults() {
    let cfg = KernelConfig::from_json_str(r#"{ "policy": "lottery", "seed": 11 }"#).unwrap();
    assert_eq!(cfg.policy, PolicyKind::Lottery);
    assert_eq!(cfg.seed, Some(11));
    assert_eq!(cfg.timer_interval, KernelConfig::default().timer_interval);
}

#[test]
fn test_json_invalid_values_rejected() {
    let err = KernelConfig::from_json_str(r#"{ "yield_ticks": 0 }"#).unwrap_err();
    assert!(err.contains("yield_ticks"));
    let err = KernelConfig::from_json_str(r#"{ "policy": "round_robin" }"#).unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_from_file_round_trip() {
    let path = std::env::temp_dir().join(format!(
        "kthreads-config-{}.json",
        std::process::id()
    ));
    let cfg = KernelConfig::new()
        .with_policy(PolicyKind::Lottery)
        .with_seed(5)
        .with_timer_interval(250);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(serde_json::to_string(&cfg).unwrap().as_bytes())
        .unwrap();
    drop(file);

    let loaded = KernelConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, cfg);
}

#[test]
fn test_policy_kind_parses_case_insensitively() {
    assert_eq!(" Priority ".parse::<PolicyKind>(), Ok(PolicyKind::Priority));
    assert_eq!("LOTTERY".parse::<PolicyKind>(), Ok(PolicyKind::Lottery));
    assert!("fifo".parse::<PolicyKind>().is_err());
}

/// Environment overrides are process-wide, so every `from_env` case lives in
/// this one test.
#[test]
fn test_from_env_overrides_and_malformed_values() {
    use prometheus_kthreads::config::{ENV_POLICY, ENV_SEED, ENV_TIMER_INTERVAL, ENV_YIELD_TICKS};

    let clear = || {
        for key in [ENV_POLICY, ENV_SEED, ENV_TIMER_INTERVAL, ENV_YIELD_TICKS] {
            std::env::remove_var(key);
        }
    };
    clear();

    let cfg = KernelConfig::from_env().unwrap();
    assert_eq!(cfg, KernelConfig::default());

    std::env::set_var(ENV_POLICY, "lottery");
    std::env::set_var(ENV_SEED, " 42 ");
    std::env::set_var(ENV_YIELD_TICKS, "25");
    let cfg = KernelConfig::from_env().unwrap();
    assert_eq!(cfg.policy, PolicyKind::Lottery);
    assert_eq!(cfg.seed, Some(42));
    assert_eq!(cfg.yield_ticks, 25);

    std::env::set_var(ENV_SEED, "forty-two");
    let err = KernelConfig::from_env().unwrap_err();
    assert!(format!("{err}").contains(ENV_SEED), "{err}");
    std::env::set_var(ENV_SEED, "42");

    std::env::set_var(ENV_POLICY, "round_robin");
    assert!(KernelConfig::from_env().is_err());
    std::env::set_var(ENV_POLICY, "priority");

    std::env::set_var(ENV_TIMER_INTERVAL, "0");
    let err = KernelConfig::from_env().unwrap_err();
    assert!(format!("{err}").contains("timer_interval"), "{err}");

    clear();
}
