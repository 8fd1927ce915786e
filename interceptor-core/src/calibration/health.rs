//! Stability and drift checks for ADC channels.

use super::stats::Stats;

/// Largest `max - min` spread a channel may show across a window.
pub const STABILITY_LIMIT: u64 = 200;

/// Largest distance a channel may sit from its calibrated baseline.
pub const DRIFT_LIMIT: u64 = 150;

/// Outcome of [`HealthPolicy::stability`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stability {
    pub spread: u64,
    pub stable: bool,
}

/// Outcome of [`HealthPolicy::drift`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Drift {
    pub baseline: u64,
    pub reading: u64,
    pub drift: u64,
    pub within_limit: bool,
}

/// Limits for the channel health checks. Both bounds are exclusive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HealthPolicy {
    pub stability_limit: u64,
    pub drift_limit: u64,
}

impl HealthPolicy {
    pub const DEFAULT: Self = Self {
        stability_limit: STABILITY_LIMIT,
        drift_limit: DRIFT_LIMIT,
    };

    /// A channel is stable while its spread stays under the limit.
    #[must_use]
    pub const fn stability(&self, stats: &Stats) -> Stability {
        let spread = stats.max - stats.min;
        Stability {
            spread,
            stable: spread < self.stability_limit,
        }
    }

    /// Compares the window median against `baseline`.
    #[must_use]
    pub const fn drift(&self, stats: &Stats, baseline: u64) -> Drift {
        let drift = stats.median.abs_diff(baseline);
        Drift {
            baseline,
            reading: stats.median,
            drift,
            within_limit: drift < self.drift_limit,
        }
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}
