// MIT License
//
// Copyright (c) 2026 Raja Lehtihet & Wael El Oraiby
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
//
//! Online mean and variance with Welford's update.
//!
//! Each value moves the running mean by `delta / n` and grows the sum of
//! squared deviations by `delta * (value - new_mean)`. No raw history is kept
//! and the result does not suffer the cancellation of `E[X^2] - E[X]^2`.

use serde::{Deserialize, Serialize};

use crate::StatsError;

/// Running count, mean and sum of squared deviations.
///
/// # Example
/// ```rust
/// use streamstats::moments::RollingMoments;
///
/// let mut moments = RollingMoments::new();
/// for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
///     moments.update(value).unwrap();
/// }
///
/// assert_eq!(moments.mean().unwrap(), 5.0);
/// assert_eq!(moments.population_variance().unwrap(), 4.0);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingMoments {
    count: u64,
    mean: f64,
    sum_sq_diff: f64,
}

impl RollingMoments {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of values folded in.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns `true` if no value has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Folds one value into the running moments.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidEvent`] when the value is not finite or
    /// would push the mean or the squared deviations out of `f64` range. The
    /// tracker is left unchanged in that case.
    pub fn update(&mut self, value: f64) -> Result<(), StatsError> {
        *self = self.with_value(value)?;
        Ok(())
    }

    /// Returns the moments that would result from folding in `value`,
    /// without modifying `self`.
    ///
    /// # Errors
    /// Same as [`RollingMoments::update`].
    pub fn with_value(&self, value: f64) -> Result<Self, StatsError> {
        if !value.is_finite() {
            return Err(StatsError::InvalidEvent("value must be finite"));
        }

        let count = self.count + 1;
        let delta = value - self.mean;
        let mean = self.mean + delta / count as f64;
        let sum_sq_diff = self.sum_sq_diff + delta * (value - mean);
        if !delta.is_finite() || !mean.is_finite() || !sum_sq_diff.is_finite() {
            return Err(StatsError::InvalidEvent(
                "value is too far from the running mean to track",
            ));
        }

        Ok(Self {
            count,
            mean,
            sum_sq_diff,
        })
    }

    /// # Errors
    /// Returns [`StatsError::NoData`] before the first value.
    pub fn mean(&self) -> Result<f64, StatsError> {
        if self.count == 0 {
            return Err(StatsError::NoData("mean requires at least one value"));
        }
        Ok(self.mean)
    }

    /// Returns `sum_sq_diff / n`.
    ///
    /// # Errors
    /// Returns [`StatsError::NoData`] before the first value.
    pub fn population_variance(&self) -> Result<f64, StatsError> {
        if self.count == 0 {
            return Err(StatsError::NoData(
                "population variance requires at least one value",
            ));
        }
        Ok(self.sum_sq_diff / self.count as f64)
    }

    /// Returns `sum_sq_diff / (n - 1)`.
    ///
    /// # Errors
    /// Returns [`StatsError::NoData`] with fewer than two values.
    pub fn sample_variance(&self) -> Result<f64, StatsError> {
        if self.count < 2 {
            return Err(StatsError::NoData(
                "sample variance requires at least two values",
            ));
        }
        Ok(self.sum_sq_diff / (self.count - 1) as f64)
    }

    /// Square root of the sample variance.
    ///
    /// # Errors
    /// Returns [`StatsError::NoData`] with fewer than two values.
    pub fn std_dev(&self) -> Result<f64, StatsError> {
        self.sample_variance().map(f64::sqrt)
    }

    /// Combines two disjoint streams (Chan et al. pairwise update).
    pub fn merge(&mut self, other: &Self) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }

        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let weight = other.count as f64 / count as f64;
        self.mean += delta * weight;
        self.sum_sq_diff += other.sum_sq_diff + delta * delta * self.count as f64 * weight;
        self.count = count;
    }

    /// Resets the tracker to its empty state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::RollingMoments;
    use crate::StatsError;

    fn from_values(values: &[f64]) -> RollingMoments {
        let mut moments = RollingMoments::new();
        for &value in values {
            moments.update(value).unwrap();
        }
        moments
    }

    #[test]
    fn textbook_sequence_has_exact_moments() {
        let moments = from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(moments.count(), 8);
        assert_eq!(moments.mean().unwrap(), 5.0);
        assert_eq!(moments.population_variance().unwrap(), 4.0);
        assert!((moments.sample_variance().unwrap() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn empty_tracker_reports_no_data() {
        let moments = RollingMoments::new();
        assert!(matches!(moments.mean(), Err(StatsError::NoData(_))));
        assert!(matches!(moments.population_variance(), Err(StatsError::NoData(_))));
        assert!(matches!(moments.sample_variance(), Err(StatsError::NoData(_))));
    }

    #[test]
    fn single_value_has_population_but_no_sample_variance() {
        let moments = from_values(&[42.0]);
        assert_eq!(moments.population_variance().unwrap(), 0.0);
        assert!(matches!(moments.sample_variance(), Err(StatsError::NoData(_))));
        assert!(moments.std_dev().is_err());
    }

    #[test]
    fn large_offset_does_not_cancel() {
        let offset = 1.0e9;
        let moments = from_values(&[offset + 4.0, offset + 7.0, offset + 13.0, offset + 16.0]);
        assert!((moments.sample_variance().unwrap() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn extreme_values_are_refused_without_corrupting_state() {
        let mut moments = from_values(&[1.0e308]);
        let before = moments;

        assert!(matches!(moments.update(-1.0e308), Err(StatsError::InvalidEvent(_))));
        assert!(matches!(moments.update(f64::NAN), Err(StatsError::InvalidEvent(_))));
        assert_eq!(moments, before);

        let mut moments = from_values(&[4.0, 8.0]);
        moments.update(6.0).unwrap();
        assert!(moments.update(f64::MAX).is_err());
        assert_eq!(moments.mean().unwrap(), 6.0);
        assert!(moments.population_variance().unwrap().is_finite());
    }

    #[test]
    fn merge_matches_sequential_updates() {
        let values: Vec<f64> = (0..1_000).map(|i| (i as f64 * 0.37).sin() * 50.0 + 10.0).collect();
        let sequential = from_values(&values);

        let mut left = from_values(&values[..400]);
        let right = from_values(&values[400..]);
        left.merge(&right);

        assert_eq!(left.count(), sequential.count());
        assert!((left.mean().unwrap() - sequential.mean().unwrap()).abs() < 1e-9);
        assert!(
            (left.sample_variance().unwrap() - sequential.sample_variance().unwrap()).abs() < 1e-9
        );
    }

    #[test]
    fn merge_with_empty_side_is_identity() {
        let filled = from_values(&[1.0, 2.0, 3.0]);
        let mut empty = RollingMoments::new();
        empty.merge(&filled);
        assert_eq!(empty, filled);

        let mut same = filled;
        same.merge(&RollingMoments::new());
        assert_eq!(same, filled);
    }
}
