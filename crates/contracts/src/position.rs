//! Log positions and subscription start policies

use serde::{Deserialize, Serialize};
use std::fmt;

/// Checkpoint inside one physical topic's log.
///
/// Positions are totally ordered. Subscribing at `p` yields every record whose
/// position is strictly greater than `p`, so `Position::ZERO` means "from the
/// very beginning of the log".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(u64);

impl Position {
    /// Checkpoint before the first record ever written.
    pub const ZERO: Position = Position(0);

    #[inline]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Raw log offset.
    #[inline]
    pub const fn offset(self) -> u64 {
        self.0
    }

    /// Absolute offset gap between two positions.
    #[inline]
    pub fn distance(self, other: Position) -> u64 {
        self.0.abs_diff(other.0)
    }

    /// Whether `self` lies in `[base, base + tolerance]`.
    #[inline]
    pub fn within_ahead(self, base: Position, tolerance: u64) -> bool {
        self >= base && self.0 - base.0 <= tolerance
    }
}

impl From<u64> for Position {
    fn from(offset: u64) -> Self {
        Self(offset)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Range of positions a topic can still serve.
///
/// `earliest` is the checkpoint just before the oldest retained record,
/// `latest` the position of the newest record (or `earliest` when empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionBounds {
    pub earliest: Position,
    pub latest: Position,
}

impl PositionBounds {
    pub fn contains(&self, position: Position) -> bool {
        position >= self.earliest && position <= self.latest
    }
}

/// Where to start when the caller does not supply an explicit position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPolicy {
    /// Oldest retained record
    Earliest,
    /// Only records written after registration
    Latest,
    /// Caller must supply a position
    #[default]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_and_distance() {
        let a = Position::new(10);
        let b = Position::new(25);
        assert!(a < b);
        assert_eq!(a.distance(b), 15);
        assert_eq!(b.distance(a), 15);
    }

    #[test]
    fn test_within_ahead() {
        let base = Position::new(100);
        assert!(Position::new(100).within_ahead(base, 0));
        assert!(Position::new(150).within_ahead(base, 50));
        assert!(!Position::new(151).within_ahead(base, 50));
        // behind the base is never inside the window
        assert!(!Position::new(99).within_ahead(base, 50));
    }

    #[test]
    fn test_bounds_contains() {
        let bounds = PositionBounds {
            earliest: Position::new(5),
            latest: Position::new(9),
        };
        assert!(bounds.contains(Position::new(5)));
        assert!(bounds.contains(Position::new(9)));
        assert!(!bounds.contains(Position::new(4)));
        assert!(!bounds.contains(Position::new(10)));
    }

    #[test]
    fn test_policy_serde() {
        let p: SubscriptionPolicy = serde_json::from_str("\"earliest\"").unwrap();
        assert_eq!(p, SubscriptionPolicy::Earliest);
        assert_eq!(SubscriptionPolicy::default(), SubscriptionPolicy::Unknown);
    }
}
