//! Threshold and sensor-range recommendations derived from [`Stats`].

use core::fmt;

use heapless::Vec as HeaplessVec;

use super::stats::Stats;
use super::{RangePolicy, ThresholdPolicy};

/// Named value for the interceptor's configuration store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConfigSetting {
    pub name: &'static str,
    pub value: u32,
}

impl ConfigSetting {
    #[must_use]
    pub const fn new(name: &'static str, value: u32) -> Self {
        Self { name, value }
    }
}

impl fmt::Display for ConfigSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// How a threshold was derived.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThresholdBasis {
    /// Midpoint between the normal p99 and the intervention minimum.
    Midpoint {
        /// `threshold - normal_p99`.
        margin_below: i64,
        /// `intervention_min - threshold`.
        margin_above: i64,
    },
    /// Normal p99 scaled by the fallback factor; no intervention data.
    ConservativeEstimate,
}

/// Caveat attached to a recommendation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Annotation {
    /// A margin is zero or negative: normal and intervention readings overlap.
    OverlappingDistributions,
    /// Derived without intervention data; recollect with an intervention run.
    ConservativeEstimate,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::OverlappingDistributions => {
                f.write_str("unsafe: normal and intervention readings overlap")
            }
            Annotation::ConservativeEstimate => {
                f.write_str("conservative estimate: no intervention data collected")
            }
        }
    }
}

/// Recommended threshold relative to the firmware default.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sensitivity {
    MoreSensitive,
    LessSensitive,
    MatchesDefault,
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensitivity::MoreSensitive => f.write_str("lower than default (more sensitive)"),
            Sensitivity::LessSensitive => f.write_str("higher than default (less sensitive)"),
            Sensitivity::MatchesDefault => f.write_str("matches default"),
        }
    }
}

/// Override threshold recommendation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThresholdRecommendation {
    pub threshold: u32,
    pub normal_p99: u64,
    pub intervention_min: Option<u64>,
    pub basis: ThresholdBasis,
    pub reference_default: u32,
    annotations: HeaplessVec<Annotation, 2>,
}

impl ThresholdRecommendation {
    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// `true` when the margins show overlapping distributions.
    #[must_use]
    pub fn is_unsafe(&self) -> bool {
        self.annotations
            .contains(&Annotation::OverlappingDistributions)
    }

    /// `margin_below` as a percentage of the normal p99.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn margin_below_percent(&self) -> Option<f64> {
        match self.basis {
            ThresholdBasis::Midpoint { margin_below, .. } if self.normal_p99 > 0 => {
                Some(margin_below as f64 / self.normal_p99 as f64 * 100.0)
            }
            _ => None,
        }
    }

    /// `margin_above` as a percentage of the intervention minimum.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn margin_above_percent(&self) -> Option<f64> {
        match (self.basis, self.intervention_min) {
            (ThresholdBasis::Midpoint { margin_above, .. }, Some(min)) if min > 0 => {
                Some(margin_above as f64 / min as f64 * 100.0)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn sensitivity(&self) -> Sensitivity {
        match self.threshold.cmp(&self.reference_default) {
            core::cmp::Ordering::Less => Sensitivity::MoreSensitive,
            core::cmp::Ordering::Greater => Sensitivity::LessSensitive,
            core::cmp::Ordering::Equal => Sensitivity::MatchesDefault,
        }
    }

    #[must_use]
    pub fn settings(&self) -> [ConfigSetting; 1] {
        [ConfigSetting::new("override_threshold", self.threshold)]
    }
}

fn saturate_u32(value: u128) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn saturate_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

impl ThresholdPolicy {
    /// Derives a threshold from the normal p99 and, if collected, the intervention minimum.
    #[must_use]
    pub fn recommend(
        &self,
        normal_p99: u64,
        intervention_min: Option<u64>,
    ) -> ThresholdRecommendation {
        let mut annotations = HeaplessVec::new();

        let (threshold, basis) = if let Some(min) = intervention_min {
            let threshold = saturate_u32((u128::from(normal_p99) + u128::from(min)) / 2);
            let margin_below = saturate_i64(i128::from(threshold) - i128::from(normal_p99));
            let margin_above = saturate_i64(i128::from(min) - i128::from(threshold));
            if margin_below <= 0 || margin_above <= 0 {
                log::warn!(
                    "threshold {threshold} is unsafe: margins {margin_below}/{margin_above} (normal p99 {normal_p99}, intervention min {min})"
                );
                let _ = annotations.push(Annotation::OverlappingDistributions);
            }
            (
                threshold,
                ThresholdBasis::Midpoint {
                    margin_below,
                    margin_above,
                },
            )
        } else {
            let scaled = u128::from(normal_p99) * u128::from(self.fallback_numerator)
                / u128::from(self.fallback_denominator.max(1));
            let threshold = saturate_u32(scaled);
            log::warn!(
                "threshold {threshold} is a conservative estimate without intervention data"
            );
            let _ = annotations.push(Annotation::ConservativeEstimate);
            (threshold, ThresholdBasis::ConservativeEstimate)
        };

        ThresholdRecommendation {
            threshold,
            normal_p99,
            intervention_min,
            basis,
            reference_default: self.reference_default,
            annotations,
        }
    }
}

/// Acceptance window for one ADC channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CalibrationRange {
    pub center: u64,
    pub tolerance: u64,
}

impl CalibrationRange {
    /// `center ± tolerance`, saturating at the ends of `u64`.
    #[must_use]
    pub const fn valid_range(&self) -> (u64, u64) {
        (
            self.center.saturating_sub(self.tolerance),
            self.center.saturating_add(self.tolerance),
        )
    }

    /// Whether `reading` falls inside [`Self::valid_range`].
    #[must_use]
    pub const fn contains(&self, reading: u64) -> bool {
        let (low, high) = self.valid_range();
        reading >= low && reading <= high
    }

    /// Settings for one channel's configuration entry.
    #[must_use]
    pub fn settings(&self) -> [ConfigSetting; 4] {
        [
            ConfigSetting::new("adc1", saturate_u32(u128::from(self.center))),
            ConfigSetting::new("adc2", 0),
            ConfigSetting::new("adc_tolerance", saturate_u32(u128::from(self.tolerance))),
            ConfigSetting::new("adc_en", 1),
        ]
    }
}

impl RangePolicy {
    /// `center = median`, `tolerance = max(floor(k·std_dev) + margin, minimum)`.
    #[must_use]
    pub fn recommend(&self, stats: &Stats) -> CalibrationRange {
        let spread = stats
            .scaled_std_dev_floor(self.std_dev_multiplier)
            .unwrap_or(u64::MAX);
        let tolerance = spread
            .saturating_add(u64::from(self.fixed_margin))
            .max(u64::from(self.minimum_tolerance));
        CalibrationRange {
            center: stats.median,
            tolerance,
        }
    }
}

/// Statistics and range for one ADC channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChannelRecommendation {
    pub stats: Stats,
    pub range: CalibrationRange,
}

/// Validation ranges for both ADC channels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SensorConfigRecommendation {
    pub channel_0: ChannelRecommendation,
    pub channel_1: ChannelRecommendation,
}

impl SensorConfigRecommendation {
    #[must_use]
    pub const fn channel(&self, index: usize) -> Option<&ChannelRecommendation> {
        match index {
            0 => Some(&self.channel_0),
            1 => Some(&self.channel_1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_margins_are_positive_when_separated() {
        let recommendation = ThresholdPolicy::DEFAULT.recommend(100, Some(300));
        assert_eq!(recommendation.threshold, 200);
        assert_eq!(
            recommendation.basis,
            ThresholdBasis::Midpoint {
                margin_below: 100,
                margin_above: 100
            }
        );
        assert!(!recommendation.is_unsafe());
        assert!(recommendation.annotations().is_empty());
        assert_eq!(recommendation.margin_below_percent(), Some(100.0));
        let above = recommendation.margin_above_percent().expect("intervention data");
        assert!((above - 33.333).abs() < 1e-3);
        assert_eq!(recommendation.sensitivity(), Sensitivity::MoreSensitive);
    }

    #[test]
    fn overlapping_distributions_are_flagged() {
        let recommendation = ThresholdPolicy::DEFAULT.recommend(250, Some(200));
        assert_eq!(recommendation.threshold, 225);
        assert_eq!(
            recommendation.basis,
            ThresholdBasis::Midpoint {
                margin_below: -25,
                margin_above: -25
            }
        );
        assert!(recommendation.is_unsafe());
    }

    #[test]
    fn touching_distributions_are_unsafe() {
        let recommendation = ThresholdPolicy::DEFAULT.recommend(100, Some(101));
        assert_eq!(recommendation.threshold, 100);
        assert!(recommendation.is_unsafe());
    }

    #[test]
    fn fallback_scales_by_one_and_a_half() {
        let recommendation = ThresholdPolicy::DEFAULT.recommend(200, None);
        assert_eq!(recommendation.threshold, 300);
        assert_eq!(recommendation.basis, ThresholdBasis::ConservativeEstimate);
        assert_eq!(
            recommendation.annotations(),
            &[Annotation::ConservativeEstimate]
        );
        assert_eq!(recommendation.margin_below_percent(), None);

        assert_eq!(ThresholdPolicy::DEFAULT.recommend(201, None).threshold, 301);
        assert_eq!(
            ThresholdPolicy::DEFAULT.recommend(224, None).sensitivity(),
            Sensitivity::MatchesDefault
        );
    }

    #[test]
    fn settings_use_configuration_names() {
        let recommendation = ThresholdPolicy::DEFAULT.recommend(200, None);
        assert_eq!(
            recommendation.settings(),
            [ConfigSetting::new("override_threshold", 300)]
        );

        let range = CalibrationRange {
            center: 1600,
            tolerance: 120,
        };
        assert_eq!(range.valid_range(), (1480, 1720));
        assert!(range.contains(1480));
        assert!(!range.contains(1721));
        let names: [&str; 4] = range.settings().map(|setting| setting.name);
        assert_eq!(names, ["adc1", "adc2", "adc_tolerance", "adc_en"]);
    }

    #[test]
    fn valid_range_saturates_at_zero() {
        let range = CalibrationRange {
            center: 40,
            tolerance: 100,
        };
        assert_eq!(range.valid_range(), (0, 140));
    }
}
