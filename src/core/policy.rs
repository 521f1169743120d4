//! Donation aggregation and selection policies.
//!
//! One queue/state implementation serves both schedulers; the policy is the
//! only thing that differs:
//!
//! | Policy    | Aggregate | Pick                        | Bounds         |
//! |-----------|-----------|-----------------------------|----------------|
//! | Priority  | max       | first-seen maximum (FIFO)   | `0..=7`        |
//! | Lottery   | sum       | weighted random draw        | `1..=i32::MAX` |

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Which policy a scheduler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Strict priority with max-donation.
    #[default]
    Priority,
    /// Lottery with ticket (sum) donation.
    Lottery,
}

impl PolicyKind {
    /// Build a boxed policy of this kind.
    ///
    /// `seed` only matters for the lottery: `Some` makes draws reproducible,
    /// `None` seeds from the operating system.
    #[must_use]
    pub fn build(self, seed: Option<u64>) -> Box<dyn Policy> {
        match self {
            Self::Priority => Box::new(PriorityPolicy),
            Self::Lottery => Box::new(match seed {
                Some(seed) => LotteryPolicy::seeded(seed),
                None => LotteryPolicy::new(),
            }),
        }
    }

    /// Priority bounds for this kind.
    #[must_use]
    pub const fn bounds(self) -> PriorityBounds {
        match self {
            Self::Priority => PriorityPolicy::BOUNDS,
            Self::Lottery => LotteryPolicy::BOUNDS,
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(Self::Priority),
            "lottery" => Ok(Self::Lottery),
            other => Err(format!("unknown scheduling policy `{other}`")),
        }
    }
}

/// Inclusive range of base priorities plus the value new threads start at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityBounds {
    /// Lowest base priority.
    pub minimum: u64,
    /// Priority assigned on first scheduler interaction.
    pub default: u64,
    /// Highest base priority.
    pub maximum: u64,
}

impl PriorityBounds {
    /// Whether `priority` is in range.
    #[must_use]
    pub const fn contains(&self, priority: u64) -> bool {
        priority >= self.minimum && priority <= self.maximum
    }
}

/// Aggregation and selection capability shared by every queue of a scheduler.
pub trait Policy: Send {
    /// Kind tag, used for logging and configuration round-trips.
    fn kind(&self) -> PolicyKind;

    /// Priority bounds enforced by `set_priority`.
    fn bounds(&self) -> PriorityBounds;

    /// Combine values; returns the identity (0) for an empty slice.
    fn aggregate(&self, values: &[u64]) -> u64;

    /// Index of the waiter to hand the resource to, or `None` if there is
    /// nothing to pick. `weights` are effective priorities in queue order.
    fn pick(&mut self, weights: &[u64]) -> Option<usize>;
}

/// Max-donation policy with longest-waiting tie-break.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityPolicy;

impl PriorityPolicy {
    /// Bounds used by the priority scheduler.
    pub const BOUNDS: PriorityBounds = PriorityBounds {
        minimum: 0,
        default: 1,
        maximum: 7,
    };
}

impl Policy for PriorityPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Priority
    }

    fn bounds(&self) -> PriorityBounds {
        Self::BOUNDS
    }

    fn aggregate(&self, values: &[u64]) -> u64 {
        values.iter().copied().max().unwrap_or(0)
    }

    fn pick(&mut self, weights: &[u64]) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (idx, &weight) in weights.iter().enumerate() {
            // strict `>` keeps the earliest waiter among equals
            if best.is_none_or(|(_, top)| weight > top) {
                best = Some((idx, weight));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Sum-donation policy with ticket-proportional random selection.
///
/// Holds one generator for the lifetime of the scheduler so successive draws
/// are independent.
#[derive(Debug)]
pub struct LotteryPolicy {
    rng: StdRng,
}

impl LotteryPolicy {
    /// Bounds used by the lottery scheduler.
    pub const BOUNDS: PriorityBounds = PriorityBounds {
        minimum: 1,
        default: 1,
        maximum: i32::MAX as u64,
    };

    /// Lottery seeded from the operating system.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Lottery with a reproducible draw sequence.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for LotteryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for LotteryPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Lottery
    }

    fn bounds(&self) -> PriorityBounds {
        Self::BOUNDS
    }

    fn aggregate(&self, values: &[u64]) -> u64 {
        values.iter().fold(0u64, |acc, &v| acc.saturating_add(v))
    }

    fn pick(&mut self, weights: &[u64]) -> Option<usize> {
        let total = self.aggregate(weights);
        if total == 0 {
            return None;
        }
        let winning = self.rng.random_range(0..total);
        let mut upper = 0u64;
        for (idx, &weight) in weights.iter().enumerate() {
            upper = upper.saturating_add(weight);
            if winning < upper {
                return Some(idx);
            }
        }
        None
    }
}
