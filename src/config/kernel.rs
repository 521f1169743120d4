//! Kernel and scheduler configuration.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, PolicyKind};

/// Environment variable selecting the policy (`priority` or `lottery`).
pub const ENV_POLICY: &str = "KTHREADS_POLICY";
/// Environment variable seeding the lottery generator.
pub const ENV_SEED: &str = "KTHREADS_SEED";
/// Environment variable overriding the timer interrupt interval.
pub const ENV_TIMER_INTERVAL: &str = "KTHREADS_TIMER_INTERVAL";
/// Environment variable overriding the ticks charged per yield.
pub const ENV_YIELD_TICKS: &str = "KTHREADS_YIELD_TICKS";

/// Configuration for a simulated kernel and its scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Scheduling policy for the ready queue and every resource queue.
    pub policy: PolicyKind,
    /// Seed for the lottery generator; `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Simulated ticks between timer interrupts.
    pub timer_interval: u64,
    /// Simulated ticks charged to each `yield_now`.
    pub yield_ticks: u64,
    /// Stack size of the OS threads backing kernel threads.
    pub thread_stack_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Priority,
            seed: None,
            timer_interval: 500,
            yield_ticks: 10,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl KernelConfig {
    /// Default configuration (priority policy).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the scheduling policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    /// Seed the lottery generator.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the timer interrupt interval in ticks.
    #[must_use]
    pub const fn with_timer_interval(mut self, ticks: u64) -> Self {
        self.timer_interval = ticks;
        self
    }

    /// Set the ticks charged per yield.
    #[must_use]
    pub const fn with_yield_ticks(mut self, ticks: u64) -> Self {
        self.yield_ticks = ticks;
        self
    }

    /// Set the backing thread stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.timer_interval == 0 {
            return Err("timer_interval must be greater than 0".into());
        }
        if self.yield_ticks == 0 {
            return Err("yield_ticks must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading kernel config {}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading kernel config {}", path.display()))
    }

    /// Build configuration from defaults overridden by `KTHREADS_*`
    /// environment variables, loading a `.env` file first if present.
    ///
    /// # Errors
    ///
    /// Fails if a variable is present but malformed, or validation fails.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var(ENV_POLICY) {
            cfg.policy = raw.parse().map_err(anyhow::Error::msg)?;
        }
        if let Ok(raw) = std::env::var(ENV_SEED) {
            cfg.seed = Some(
                raw.trim()
                    .parse()
                    .with_context(|| format!("{ENV_SEED}=`{raw}` is not a number"))?,
            );
        }
        if let Ok(raw) = std::env::var(ENV_TIMER_INTERVAL) {
            cfg.timer_interval = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_TIMER_INTERVAL}=`{raw}` is not a number"))?;
        }
        if let Ok(raw) = std::env::var(ENV_YIELD_TICKS) {
            cfg.yield_ticks = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_YIELD_TICKS}=`{raw}` is not a number"))?;
        }
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}
