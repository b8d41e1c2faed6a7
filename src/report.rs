//! Wait samples and per-run summaries

use std::{fmt, time::Duration};

use crate::inherit::InheritancePolicy;

/// How long one acquisition by the high role blocked, in whole milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WaitSample {
    pub duration_ms: u64,
}

impl WaitSample {
    pub const fn from_millis(duration_ms: u64) -> Self {
        Self { duration_ms }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl From<Duration> for WaitSample {
    fn from(duration: Duration) -> Self {
        Self {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Result of one scenario run, handed to whoever prints it
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub policy: InheritancePolicy,
    /// In acquisition order
    pub samples: Vec<WaitSample>,
    pub medium_bursts: u64,
    pub low_cycles: u64,
    /// Holder boosts performed by the inheritance controller
    pub boosts: usize,
    /// Wall time from start to the last worker joining
    pub elapsed: Duration,
}

impl ScenarioReport {
    /// Mean wait in milliseconds, `None` when the high role never acquired
    pub fn mean_wait(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }

        let total: u64 = self.samples.iter().map(|s| s.duration_ms).sum();
        Some(total as f64 / self.samples.len() as f64)
    }

    pub fn max_wait(&self) -> Option<WaitSample> {
        self.samples.iter().max().copied()
    }

    /// Samples strictly longer than `threshold_ms`
    pub fn count_over(&self, threshold_ms: u64) -> usize {
        self.samples
            .iter()
            .filter(|s| s.duration_ms > threshold_ms)
            .count()
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.policy {
            InheritancePolicy::Disabled => "without inheritance",
            InheritancePolicy::Enabled => "with inheritance",
        };

        write!(f, "{}: {} acquisitions", label, self.samples.len())?;
        match (self.mean_wait(), self.max_wait()) {
            (Some(mean), Some(max)) => write!(
                f,
                ", mean wait {:.1}ms, max wait {}ms, {} over 50ms",
                mean,
                max.duration_ms,
                self.count_over(50)
            )?,
            _ => f.write_str(", high never acquired")?,
        }
        write!(
            f,
            " ({} medium bursts, {} low cycles, {} boosts, {:.1?})",
            self.medium_bursts, self.low_cycles, self.boosts, self.elapsed
        )
    }
}
