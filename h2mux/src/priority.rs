use serde::{Deserialize, Serialize};

pub(crate) const NUM_PRIORITIES: usize = 6;

static DESCENDING: [Priority; NUM_PRIORITIES] = [
    Priority::Highest,
    Priority::Medium,
    Priority::Low,
    Priority::Lowest,
    Priority::Idle,
    Priority::Throttled,
];

/// Scheduling hint for outgoing writes. Never affects the order reads are
/// delivered in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Priority {
    Throttled = 0,
    Idle = 1,
    Lowest = 2,
    Low = 3,
    Medium = 4,
    Highest = 5,
}

impl Priority {
    pub const MINIMUM: Priority = Priority::Throttled;

    pub const MAXIMUM: Priority = Priority::Highest;

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Highest first.
    pub(crate) fn descending() -> impl Iterator<Item = Priority> {
        DESCENDING.iter().copied()
    }

    /// HTTP/2 dependency weight derived from the SPDY/3 priority scale.
    pub fn weight(self) -> u8 {
        const STEPS: u8 = 255 / 7;
        let spdy = (Priority::MAXIMUM as u8) - (self as u8);
        (7 - spdy) * STEPS + 1
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descending_order() {
        let all: Vec<_> = Priority::descending().collect();
        assert_eq!(all.len(), NUM_PRIORITIES);
        assert_eq!(all[0], Priority::MAXIMUM);
        assert_eq!(all[NUM_PRIORITIES - 1], Priority::MINIMUM);
        assert!(all.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_weight_is_monotonic() {
        assert_eq!(Priority::Highest.weight(), 253);
        assert!(Priority::Highest.weight() > Priority::Medium.weight());
        assert!(Priority::Idle.weight() > Priority::Throttled.weight());
    }
}
