//! Magnitude-versus-threshold tracking for override testing.

use core::fmt;

/// Percentage of the threshold at which a reading is reported as near it.
pub const NEAR_THRESHOLD_PERCENT: u64 = 90;

/// Percentage of the threshold at which a reading is reported as approaching it.
pub const APPROACHING_PERCENT: u64 = 70;

/// How close a magnitude is to tripping the override.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum OverrideLevel {
    Normal,
    Approaching,
    NearThreshold,
    /// The firmware reports the override as active.
    Active,
}

impl OverrideLevel {
    /// Classifies `magnitude` against `threshold`.
    ///
    /// A zero threshold never counts as approached.
    #[must_use]
    pub const fn classify(magnitude: u16, override_active: bool, threshold: u32) -> Self {
        if override_active {
            return OverrideLevel::Active;
        }
        if threshold == 0 {
            return OverrideLevel::Normal;
        }
        let scaled = magnitude as u64 * 100;
        let threshold = threshold as u64;
        if scaled >= threshold * NEAR_THRESHOLD_PERCENT {
            OverrideLevel::NearThreshold
        } else if scaled >= threshold * APPROACHING_PERCENT {
            OverrideLevel::Approaching
        } else {
            OverrideLevel::Normal
        }
    }
}

impl fmt::Display for OverrideLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OverrideLevel::Normal => "NORMAL",
            OverrideLevel::Approaching => "APPROACHING",
            OverrideLevel::NearThreshold => "NEAR THRESHOLD",
            OverrideLevel::Active => "OVERRIDE ACTIVE",
        };
        f.pad(label)
    }
}

/// Summary of an override test run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OverrideVerdict {
    /// The override fired at least once.
    Triggered {
        /// Peak magnitude reached 1.5 × threshold; the threshold may be low for the application.
        well_above_threshold: bool,
    },
    /// The override never fired.
    NotTriggered {
        /// Peak magnitude stayed under half the threshold; more torque is needed to test it.
        needs_more_torque: bool,
    },
}

/// Tracks override activations and peak magnitude across a stream of readings.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OverrideWatch {
    threshold: u32,
    readings: u32,
    activations: u32,
    clears: u32,
    active: bool,
    max_magnitude: u16,
}

impl OverrideWatch {
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self {
            threshold,
            readings: 0,
            activations: 0,
            clears: 0,
            active: false,
            max_magnitude: 0,
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Feeds one reading and returns its level.
    pub fn observe(&mut self, magnitude: u16, override_active: bool) -> OverrideLevel {
        self.readings = self.readings.saturating_add(1);
        self.max_magnitude = self.max_magnitude.max(magnitude);

        if override_active != self.active {
            if override_active {
                self.activations = self.activations.saturating_add(1);
                log::info!(
                    "override triggered: magnitude {magnitude} threshold {}",
                    self.threshold
                );
            } else {
                self.clears = self.clears.saturating_add(1);
                log::info!("override cleared: magnitude {magnitude}");
            }
            self.active = override_active;
        }

        OverrideLevel::classify(magnitude, override_active, self.threshold)
    }

    #[must_use]
    pub const fn readings(&self) -> u32 {
        self.readings
    }

    /// Number of inactive-to-active edges.
    #[must_use]
    pub const fn activations(&self) -> u32 {
        self.activations
    }

    /// Number of active-to-inactive edges.
    #[must_use]
    pub const fn clears(&self) -> u32 {
        self.clears
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn max_magnitude(&self) -> u16 {
        self.max_magnitude
    }

    #[must_use]
    pub const fn verdict(&self) -> OverrideVerdict {
        let peak = self.max_magnitude as u64;
        let threshold = self.threshold as u64;
        if self.activations > 0 {
            OverrideVerdict::Triggered {
                well_above_threshold: peak * 2 >= threshold * 3,
            }
        } else {
            OverrideVerdict::NotTriggered {
                needs_more_torque: peak * 2 < threshold,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_threshold_percentages() {
        assert_eq!(OverrideLevel::classify(100, false, 336), OverrideLevel::Normal);
        assert_eq!(
            OverrideLevel::classify(236, false, 336),
            OverrideLevel::Approaching
        );
        assert_eq!(
            OverrideLevel::classify(303, false, 336),
            OverrideLevel::NearThreshold
        );
        assert_eq!(OverrideLevel::classify(0, true, 336), OverrideLevel::Active);
        assert_eq!(OverrideLevel::classify(500, false, 0), OverrideLevel::Normal);
    }

    #[test]
    fn watch_counts_edges_not_levels() {
        let mut watch = OverrideWatch::new(300);
        for (magnitude, active) in [(100, false), (320, true), (350, true), (90, false), (310, true)] {
            watch.observe(magnitude, active);
        }
        assert_eq!(watch.activations(), 2);
        assert_eq!(watch.clears(), 1);
        assert!(watch.is_active());
        assert_eq!(watch.max_magnitude(), 350);
        assert_eq!(watch.readings(), 5);
        assert_eq!(
            watch.verdict(),
            OverrideVerdict::Triggered {
                well_above_threshold: false
            }
        );
    }

    #[test]
    fn verdict_flags_headroom_and_weak_tests() {
        let mut watch = OverrideWatch::new(200);
        watch.observe(300, true);
        assert_eq!(
            watch.verdict(),
            OverrideVerdict::Triggered {
                well_above_threshold: true
            }
        );

        let mut idle = OverrideWatch::new(200);
        idle.observe(99, false);
        assert_eq!(
            idle.verdict(),
            OverrideVerdict::NotTriggered {
                needs_more_torque: true
            }
        );
    }
}
