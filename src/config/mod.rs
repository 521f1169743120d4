//! Configuration models for the simulated kernel.

pub mod kernel;

pub use kernel::{KernelConfig, ENV_POLICY, ENV_SEED, ENV_TIMER_INTERVAL, ENV_YIELD_TICKS};
