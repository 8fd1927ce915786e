//! Threshold and sensor-range calibration.
//!
//! Readings are collected over a caller-defined wall-clock window, summarized
//! once the window closes, and turned into recommended configuration values.
//! The constants behind every recommendation live in [`CalibrationPolicy`];
//! they were chosen empirically, so changing them is a policy decision.
//!
//! [`CalibrationSession`] drives the override-threshold workflow:
//!
//! ```text
//! Idle -> CollectingNormal -> AnalyzedNormal
//!      -> (CollectingIntervention -> AnalyzedIntervention)? -> Recommended
//! ```
//!
//! [`SensorCalibration`] runs the single-window ADC range workflow.

use core::fmt;
use core::time::Duration;

pub mod health;
pub mod recommend;
pub mod stats;

pub use health::{DRIFT_LIMIT, Drift, HealthPolicy, STABILITY_LIMIT, Stability};

pub use recommend::{
    Annotation, CalibrationRange, ChannelRecommendation, ConfigSetting,
    SensorConfigRecommendation, Sensitivity, ThresholdBasis, ThresholdRecommendation,
};
pub use stats::{SampleSet, Stats, percentile, summarize_in_place};

#[cfg(feature = "alloc")]
pub use stats::summarize;

/// Threshold the firmware ships with (`0x150`).
pub const DEFAULT_OVERRIDE_THRESHOLD: u32 = 336;

/// Samples held per collection window by default.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 4096;

/// Default collection window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Constants used by [`ThresholdPolicy::recommend`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ThresholdPolicy {
    /// Fallback threshold is `p99 * numerator / denominator`.
    pub fallback_numerator: u32,
    pub fallback_denominator: u32,
    /// Default used for the sensitivity comparison.
    pub reference_default: u32,
}

impl ThresholdPolicy {
    pub const DEFAULT: Self = Self {
        fallback_numerator: 3,
        fallback_denominator: 2,
        reference_default: DEFAULT_OVERRIDE_THRESHOLD,
    };
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Constants used by [`RangePolicy::recommend`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RangePolicy {
    pub std_dev_multiplier: u32,
    pub fixed_margin: u32,
    pub minimum_tolerance: u32,
}

impl RangePolicy {
    pub const DEFAULT: Self = Self {
        std_dev_multiplier: 3,
        fixed_margin: 50,
        minimum_tolerance: 100,
    };
}

impl Default for RangePolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Every tunable used by the calibration workflows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CalibrationPolicy {
    pub threshold: ThresholdPolicy,
    pub range: RangePolicy,
    /// Fewest readings a window must hold before it is analyzed.
    pub minimum_samples: usize,
}

impl CalibrationPolicy {
    pub const DEFAULT: Self = Self {
        threshold: ThresholdPolicy::DEFAULT,
        range: RangePolicy::DEFAULT,
        minimum_samples: 1,
    };
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Threshold recommendation with the default policy.
#[must_use]
pub fn recommend_threshold(
    normal: &Stats,
    intervention: Option<&Stats>,
) -> ThresholdRecommendation {
    ThresholdPolicy::DEFAULT.recommend(normal.p99, intervention.map(|stats| stats.min))
}

/// Range recommendation with the default policy.
#[must_use]
pub fn recommend_calibration_ranges(adc_stats: &Stats) -> CalibrationRange {
    RangePolicy::DEFAULT.recommend(adc_stats)
}

/// Operating scenario a sample set was collected under.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Scenario {
    /// Hands off, normal driving.
    Normal,
    /// Driver actively overriding.
    Intervention,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Normal => f.write_str("normal"),
            Scenario::Intervention => f.write_str("intervention"),
        }
    }
}

/// Phases of the threshold calibration workflow.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationPhase {
    Idle,
    CollectingNormal,
    AnalyzedNormal,
    CollectingIntervention,
    AnalyzedIntervention,
    Recommended,
}

impl CalibrationPhase {
    /// Returns `true` while a collection window is open.
    #[must_use]
    pub const fn is_collecting(self) -> bool {
        matches!(
            self,
            CalibrationPhase::CollectingNormal | CalibrationPhase::CollectingIntervention
        )
    }

    /// Returns `true` once a recommendation has been produced.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, CalibrationPhase::Recommended)
    }
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Failure reported when attempting an invalid phase transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransitionError {
    pub from: CalibrationPhase,
    pub to: CalibrationPhase,
}

impl TransitionError {
    /// Creates a new transition error describing the attempted phases.
    #[must_use]
    pub const fn new(from: CalibrationPhase, to: CalibrationPhase) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot move from {} to {}", self.from, self.to)
    }
}

/// Errors reported by the calibration engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationError {
    /// Too few readings to analyze; the window has to be collected again.
    InsufficientSamples { required: usize, collected: usize },
    /// The sample buffer is full.
    SampleOverflow { capacity: usize },
    /// Readings too large for the statistics accumulators.
    ValueOverflow,
    /// Readings were offered outside a collection window.
    NotCollecting(CalibrationPhase),
    /// Invalid workflow step.
    Transition(TransitionError),
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::InsufficientSamples {
                required,
                collected,
            } => write!(
                f,
                "insufficient samples: collected {collected}, need {required}"
            ),
            CalibrationError::SampleOverflow { capacity } => {
                write!(f, "sample buffer full ({capacity} readings)")
            }
            CalibrationError::ValueOverflow => f.write_str("sample values overflow statistics"),
            CalibrationError::NotCollecting(phase) => {
                write!(f, "no collection window open (phase {phase})")
            }
            CalibrationError::Transition(error) => error.fmt(f),
        }
    }
}

impl core::error::Error for CalibrationError {}

impl From<TransitionError> for CalibrationError {
    fn from(error: TransitionError) -> Self {
        CalibrationError::Transition(error)
    }
}

/// Monotonic instant used to time collection windows.
pub trait SampleInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Outcome of offering a reading to an open window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WindowStatus {
    /// Reading stored; the window is still open.
    Open,
    /// The window has elapsed; the reading was not stored.
    Elapsed,
}

#[derive(Copy, Clone, Debug)]
struct Window<TInstant> {
    started_at: TInstant,
    length: Duration,
}

impl<TInstant: SampleInstant> Window<TInstant> {
    fn elapsed(&self, now: TInstant) -> bool {
        now.saturating_duration_since(self.started_at) >= self.length
    }
}

/// Override-threshold calibration workflow.
pub struct CalibrationSession<TInstant, const CAPACITY: usize = DEFAULT_SAMPLE_CAPACITY> {
    policy: CalibrationPolicy,
    window_length: Duration,
    phase: CalibrationPhase,
    window: Option<Window<TInstant>>,
    samples: SampleSet<CAPACITY>,
    normal: Option<Stats>,
    intervention: Option<Stats>,
    recommendation: Option<ThresholdRecommendation>,
}

impl<TInstant, const CAPACITY: usize> CalibrationSession<TInstant, CAPACITY>
where
    TInstant: SampleInstant,
{
    #[must_use]
    pub const fn new(policy: CalibrationPolicy, window_length: Duration) -> Self {
        Self {
            policy,
            window_length,
            phase: CalibrationPhase::Idle,
            window: None,
            samples: SampleSet::new(Scenario::Normal),
            normal: None,
            intervention: None,
            recommendation: None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    #[must_use]
    pub const fn policy(&self) -> &CalibrationPolicy {
        &self.policy
    }

    /// Readings held by the open window.
    #[must_use]
    pub fn collected(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub const fn normal_stats(&self) -> Option<&Stats> {
        self.normal.as_ref()
    }

    #[must_use]
    pub const fn intervention_stats(&self) -> Option<&Stats> {
        self.intervention.as_ref()
    }

    #[must_use]
    pub const fn recommendation(&self) -> Option<&ThresholdRecommendation> {
        self.recommendation.as_ref()
    }

    fn transition(
        &mut self,
        expected: CalibrationPhase,
        next: CalibrationPhase,
    ) -> Result<(), TransitionError> {
        if self.phase != expected {
            return Err(TransitionError::new(self.phase, next));
        }
        log::debug!("calibration {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    fn open_window(&mut self, scenario: Scenario, now: TInstant) {
        self.samples = SampleSet::new(scenario);
        self.window = Some(Window {
            started_at: now,
            length: self.window_length,
        });
    }

    /// Opens the normal-operation window at `now`.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::Transition`] unless the session is idle.
    pub fn start_normal(&mut self, now: TInstant) -> Result<(), CalibrationError> {
        self.transition(CalibrationPhase::Idle, CalibrationPhase::CollectingNormal)?;
        self.open_window(Scenario::Normal, now);
        Ok(())
    }

    /// Opens the manual-intervention window at `now`.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::Transition`] unless normal data has been analyzed.
    pub fn start_intervention(&mut self, now: TInstant) -> Result<(), CalibrationError> {
        self.transition(
            CalibrationPhase::AnalyzedNormal,
            CalibrationPhase::CollectingIntervention,
        )?;
        self.open_window(Scenario::Intervention, now);
        Ok(())
    }

    /// Whether the open window has run its full length at `now`.
    #[must_use]
    pub fn window_elapsed(&self, now: TInstant) -> bool {
        self.window.is_some_and(|window| window.elapsed(now))
    }

    /// Offers a reading taken at `now`.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::NotCollecting`] outside a window and
    /// [`CalibrationError::SampleOverflow`] when the buffer is full.
    pub fn record(&mut self, now: TInstant, sample: u64) -> Result<WindowStatus, CalibrationError> {
        let Some(window) = self.window.filter(|_| self.phase.is_collecting()) else {
            return Err(CalibrationError::NotCollecting(self.phase));
        };
        if window.elapsed(now) {
            return Ok(WindowStatus::Elapsed);
        }
        self.samples.push(sample)?;
        Ok(WindowStatus::Open)
    }

    fn close_window(&mut self) -> Result<Stats, CalibrationError> {
        self.window = None;
        let collected = self.samples.len();
        let required = self.policy.minimum_samples.max(1);
        let result = if collected < required {
            Err(CalibrationError::InsufficientSamples {
                required,
                collected,
            })
        } else {
            self.samples.summarize()
        };
        self.samples.clear();
        result
    }

    /// Closes the normal window and summarizes it.
    ///
    /// With too few readings the session returns to `Idle` so the window can
    /// be collected again.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::Transition`] outside the normal window, or the
    /// summarizing error.
    pub fn finish_normal(&mut self) -> Result<&Stats, CalibrationError> {
        self.transition(
            CalibrationPhase::CollectingNormal,
            CalibrationPhase::AnalyzedNormal,
        )?;
        match self.close_window() {
            Ok(stats) => Ok(&*self.normal.insert(stats)),
            Err(error) => {
                log::warn!("normal window rejected: {error}");
                self.phase = CalibrationPhase::Idle;
                Err(error)
            }
        }
    }

    /// Closes the intervention window and summarizes it.
    ///
    /// With too few readings the session returns to `AnalyzedNormal`, from
    /// where the window can be retried or skipped.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::Transition`] outside the intervention window, or
    /// the summarizing error.
    pub fn finish_intervention(&mut self) -> Result<&Stats, CalibrationError> {
        self.transition(
            CalibrationPhase::CollectingIntervention,
            CalibrationPhase::AnalyzedIntervention,
        )?;
        match self.close_window() {
            Ok(stats) => Ok(&*self.intervention.insert(stats)),
            Err(error) => {
                log::warn!("intervention window rejected: {error}");
                self.phase = CalibrationPhase::AnalyzedNormal;
                Err(error)
            }
        }
    }

    /// Produces the conservative recommendation without intervention data.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::Transition`] unless normal data has just been analyzed.
    pub fn skip_intervention(&mut self) -> Result<&ThresholdRecommendation, CalibrationError> {
        if self.phase != CalibrationPhase::AnalyzedNormal {
            return Err(TransitionError::new(self.phase, CalibrationPhase::Recommended).into());
        }
        self.recommend()
    }

    /// Produces the recommendation from whatever has been analyzed.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::Transition`] unless the session is in
    /// `AnalyzedNormal` or `AnalyzedIntervention`.
    pub fn recommend(&mut self) -> Result<&ThresholdRecommendation, CalibrationError> {
        let intervention = match self.phase {
            CalibrationPhase::AnalyzedNormal => None,
            CalibrationPhase::AnalyzedIntervention => self.intervention.map(|stats| stats.min),
            phase => {
                return Err(TransitionError::new(phase, CalibrationPhase::Recommended).into());
            }
        };
        let Some(normal) = self.normal else {
            return Err(TransitionError::new(self.phase, CalibrationPhase::Recommended).into());
        };

        let recommendation = self.policy.threshold.recommend(normal.p99, intervention);
        self.phase = CalibrationPhase::Recommended;
        Ok(&*self.recommendation.insert(recommendation))
    }

    /// Discards all data and returns to `Idle`.
    pub fn reset(&mut self) {
        self.phase = CalibrationPhase::Idle;
        self.window = None;
        self.samples.clear();
        self.normal = None;
        self.intervention = None;
        self.recommendation = None;
    }
}

/// Single-window collection of both ADC channels for range calibration.
pub struct SensorCalibration<TInstant, const CAPACITY: usize = DEFAULT_SAMPLE_CAPACITY> {
    policy: CalibrationPolicy,
    window_length: Duration,
    window: Option<Window<TInstant>>,
    channel_0: SampleSet<CAPACITY>,
    channel_1: SampleSet<CAPACITY>,
}

impl<TInstant, const CAPACITY: usize> SensorCalibration<TInstant, CAPACITY>
where
    TInstant: SampleInstant,
{
    #[must_use]
    pub const fn new(policy: CalibrationPolicy, window_length: Duration) -> Self {
        Self {
            policy,
            window_length,
            window: None,
            channel_0: SampleSet::new(Scenario::Normal),
            channel_1: SampleSet::new(Scenario::Normal),
        }
    }

    /// Opens the window at `now`, dropping earlier readings.
    pub fn start(&mut self, now: TInstant) {
        self.channel_0.clear();
        self.channel_1.clear();
        self.window = Some(Window {
            started_at: now,
            length: self.window_length,
        });
    }

    #[must_use]
    pub const fn is_collecting(&self) -> bool {
        self.window.is_some()
    }

    #[must_use]
    pub fn collected(&self) -> usize {
        self.channel_0.len()
    }

    /// Offers one reading pair taken at `now`.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::NotCollecting`] before [`Self::start`] and
    /// [`CalibrationError::SampleOverflow`] when the buffers are full.
    pub fn record(
        &mut self,
        now: TInstant,
        adc_0: u16,
        adc_1: u16,
    ) -> Result<WindowStatus, CalibrationError> {
        let Some(window) = self.window else {
            return Err(CalibrationError::NotCollecting(CalibrationPhase::Idle));
        };
        if window.elapsed(now) {
            return Ok(WindowStatus::Elapsed);
        }
        if self.channel_0.len() >= CAPACITY {
            return Err(CalibrationError::SampleOverflow { capacity: CAPACITY });
        }
        self.channel_0.push(u64::from(adc_0))?;
        self.channel_1.push(u64::from(adc_1))?;
        Ok(WindowStatus::Open)
    }

    /// Closes the window and recommends ranges for both channels.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::NotCollecting`] when no window is open and
    /// [`CalibrationError::InsufficientSamples`] when it holds too few readings.
    pub fn finish(&mut self) -> Result<SensorConfigRecommendation, CalibrationError> {
        if self.window.take().is_none() {
            return Err(CalibrationError::NotCollecting(CalibrationPhase::Idle));
        }
        let collected = self.channel_0.len();
        let required = self.policy.minimum_samples.max(1);
        if collected < required {
            return Err(CalibrationError::InsufficientSamples {
                required,
                collected,
            });
        }

        let stats_0 = self.channel_0.summarize()?;
        let stats_1 = self.channel_1.summarize()?;
        Ok(SensorConfigRecommendation {
            channel_0: ChannelRecommendation {
                stats: stats_0,
                range: self.policy.range.recommend(&stats_0),
            },
            channel_1: ChannelRecommendation {
                stats: stats_1,
                range: self.policy.range.recommend(&stats_1),
            },
        })
    }
}
