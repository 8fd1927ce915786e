//! Summary statistics over sampled readings.
//!
//! Percentiles use nearest rank without interpolation:
//! `sorted[floor(count * p)]`, clamped to the last element. With few samples
//! small percentiles land on index 0; that discretization is expected.
//! Standard deviation is the population form.

use heapless::Vec as HeaplessVec;

use super::{CalibrationError, Scenario};

pub const P2_5: f64 = 0.025;
pub const P95: f64 = 0.95;
pub const P97_5: f64 = 0.975;
pub const P99: f64 = 0.99;

const STD_DEV_SCALE: u128 = 1_000_000;

/// Summary of one sample set.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    /// `sorted[count / 2]`.
    pub median: u64,
    pub p2_5: u64,
    pub p95: u64,
    pub p97_5: u64,
    pub p99: u64,
    pub std_dev: f64,
    /// `n·Σx² − (Σx)²`; `std_dev == sqrt(variance_numerator) / n`.
    variance_numerator: u128,
}

impl Stats {
    /// `max - min`.
    #[must_use]
    pub const fn spread(&self) -> u64 {
        self.max - self.min
    }

    /// `floor(multiplier · std_dev)`, computed in integers.
    ///
    /// Returns `None` if the intermediate product overflows.
    #[must_use]
    pub fn scaled_std_dev_floor(&self, multiplier: u32) -> Option<u64> {
        let multiplier = u128::from(multiplier);
        let scaled = self
            .variance_numerator
            .checked_mul(multiplier.checked_mul(multiplier)?)?;
        let count = u128::try_from(self.count).ok()?;
        u64::try_from(scaled.isqrt() / count).ok()
    }

    /// Computes statistics over samples already sorted ascending.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::InsufficientSamples`] for an empty slice and
    /// [`CalibrationError::ValueOverflow`] when the sums do not fit 128 bits.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_sorted(sorted: &[u64]) -> Result<Self, CalibrationError> {
        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return Err(CalibrationError::InsufficientSamples {
                required: 1,
                collected: 0,
            });
        };
        let count = sorted.len();
        let n = u128::try_from(count).map_err(|_| CalibrationError::ValueOverflow)?;

        let mut sum: u128 = 0;
        let mut sum_of_squares: u128 = 0;
        for &sample in sorted {
            let sample = u128::from(sample);
            sum = sum
                .checked_add(sample)
                .ok_or(CalibrationError::ValueOverflow)?;
            sum_of_squares = sample
                .checked_mul(sample)
                .and_then(|square| sum_of_squares.checked_add(square))
                .ok_or(CalibrationError::ValueOverflow)?;
        }

        let variance_numerator = n
            .checked_mul(sum_of_squares)
            .and_then(|scaled| scaled.checked_sub(sum.checked_mul(sum)?))
            .ok_or(CalibrationError::ValueOverflow)?;

        let std_dev = match variance_numerator.checked_mul(STD_DEV_SCALE * STD_DEV_SCALE) {
            Some(scaled) => scaled.isqrt() as f64 / STD_DEV_SCALE as f64 / count as f64,
            None => variance_numerator.isqrt() as f64 / count as f64,
        };

        Ok(Self {
            count,
            min,
            max,
            mean: sum as f64 / count as f64,
            median: sorted[count / 2],
            p2_5: nearest_rank(sorted, P2_5),
            p95: nearest_rank(sorted, P95),
            p97_5: nearest_rank(sorted, P97_5),
            p99: nearest_rank(sorted, P99),
            std_dev,
            variance_numerator,
        })
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn nearest_rank(sorted: &[u64], p: f64) -> u64 {
    let index = (sorted.len() as f64 * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Nearest-rank percentile of `sorted`; `None` when it is empty.
#[must_use]
pub fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    (!sorted.is_empty()).then(|| nearest_rank(sorted, p.clamp(0.0, 1.0)))
}

/// Sorts `samples` and summarizes them.
///
/// # Errors
///
/// See [`Stats::from_sorted`].
pub fn summarize_in_place(samples: &mut [u64]) -> Result<Stats, CalibrationError> {
    samples.sort_unstable();
    Stats::from_sorted(samples)
}

/// Summarizes `samples` without modifying them.
///
/// # Errors
///
/// See [`Stats::from_sorted`].
#[cfg(feature = "alloc")]
pub fn summarize(samples: &[u64]) -> Result<Stats, CalibrationError> {
    let mut sorted = alloc::vec::Vec::from(samples);
    summarize_in_place(&mut sorted)
}

/// Fixed-capacity readings collected for one scenario.
#[derive(Clone, Debug)]
pub struct SampleSet<const CAPACITY: usize> {
    scenario: Scenario,
    samples: HeaplessVec<u64, CAPACITY>,
}

impl<const CAPACITY: usize> SampleSet<CAPACITY> {
    #[must_use]
    pub const fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            samples: HeaplessVec::new(),
        }
    }

    #[must_use]
    pub const fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Appends a reading.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::SampleOverflow`] once `CAPACITY` readings are held.
    pub fn push(&mut self, sample: u64) -> Result<(), CalibrationError> {
        self.samples
            .push(sample)
            .map_err(|_| CalibrationError::SampleOverflow { capacity: CAPACITY })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.samples
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Summarizes a sorted copy of the readings.
    ///
    /// # Errors
    ///
    /// See [`Stats::from_sorted`].
    pub fn summarize(&self) -> Result<Stats, CalibrationError> {
        let mut sorted = self.samples.clone();
        summarize_in_place(&mut sorted)
    }
}
