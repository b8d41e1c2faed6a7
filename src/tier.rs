//! Abstract priority tiers

use core::fmt;

/// Abstract priority level of a worker. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityTier {
    Low,
    Medium,
    High,
}

impl PriorityTier {
    /// All tiers, lowest first
    pub const ALL: [PriorityTier; 3] = [PriorityTier::Low, PriorityTier::Medium, PriorityTier::High];

    /// Numeric level: `Low = 1`, `Medium = 2`, `High = 3`
    pub const fn level(self) -> u8 {
        match self {
            PriorityTier::Low => 1,
            PriorityTier::Medium => 2,
            PriorityTier::High => 3,
        }
    }

    /// Native `SCHED_FIFO` priority this tier maps to.
    pub const fn fifo_priority(self) -> libc::c_int {
        match self {
            PriorityTier::Low => 10,
            PriorityTier::Medium => 50,
            PriorityTier::High => 90,
        }
    }

    pub(crate) const fn index(self) -> usize {
        self.level() as usize - 1
    }

    pub const fn name(self) -> &'static str {
        match self {
            PriorityTier::Low => "low",
            PriorityTier::Medium => "medium",
            PriorityTier::High => "high",
        }
    }
}

impl TryFrom<u8> for PriorityTier {
    type Error = u8;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            1 => Ok(PriorityTier::Low),
            2 => Ok(PriorityTier::Medium),
            3 => Ok(PriorityTier::High),
            other => Err(other),
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_totally_ordered() {
        assert!(PriorityTier::Low < PriorityTier::Medium);
        assert!(PriorityTier::Medium < PriorityTier::High);
        assert_eq!(
            PriorityTier::ALL.iter().max(),
            Some(&PriorityTier::High)
        );
    }

    #[test]
    fn fifo_priorities_follow_tier_order() {
        assert_eq!(PriorityTier::High.fifo_priority(), 90);
        assert_eq!(PriorityTier::Medium.fifo_priority(), 50);
        assert_eq!(PriorityTier::Low.fifo_priority(), 10);
    }

    #[test]
    fn levels_round_trip_and_reject_unknown() {
        for tier in PriorityTier::ALL {
            assert_eq!(PriorityTier::try_from(tier.level()), Ok(tier));
        }
        assert_eq!(PriorityTier::try_from(0), Err(0));
        assert_eq!(PriorityTier::try_from(4), Err(4));
    }
}
