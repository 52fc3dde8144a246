//! Poll priorities and the periods they map to

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a variable is polled.
///
/// `Disabled` variables are never polled: their value is computed from
/// other variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Computed, not polled
    Disabled,
    /// Slowest polling
    Lowest,
    /// Slow polling
    Low,
    /// Default polling
    Medium,
    /// Fast polling
    High,
    /// Fastest polling
    Highest,
}

impl Priority {
    /// Every polled priority, fastest first
    pub const POLLED: [Priority; 5] = [
        Priority::Highest,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Lowest,
    ];

    /// Whether the memory buffer reads this priority
    pub fn is_polled(self) -> bool {
        self != Priority::Disabled
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Disabled => write!(f, "disabled"),
            Priority::Lowest => write!(f, "lowest"),
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Highest => write!(f, "highest"),
        }
    }
}

/// Period assigned to each polled priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPeriods {
    /// Period for [`Priority::Highest`]
    pub highest: Duration,
    /// Period for [`Priority::High`]
    pub high: Duration,
    /// Period for [`Priority::Medium`]
    pub medium: Duration,
    /// Period for [`Priority::Low`]
    pub low: Duration,
    /// Period for [`Priority::Lowest`]
    pub lowest: Duration,
}

impl PollPeriods {
    /// Build from millisecond values, fastest first
    pub fn from_millis(millis: [u64; 5]) -> Self {
        let [highest, high, medium, low, lowest] = millis.map(Duration::from_millis);
        Self {
            highest,
            high,
            medium,
            low,
            lowest,
        }
    }

    /// Period for a priority, `None` for computed variables
    pub fn period(&self, priority: Priority) -> Option<Duration> {
        match priority {
            Priority::Disabled => None,
            Priority::Lowest => Some(self.lowest),
            Priority::Low => Some(self.low),
            Priority::Medium => Some(self.medium),
            Priority::High => Some(self.high),
            Priority::Highest => Some(self.highest),
        }
    }
}

impl Default for PollPeriods {
    fn default() -> Self {
        Self::from_millis([25, 50, 100, 200, 400])
    }
}
