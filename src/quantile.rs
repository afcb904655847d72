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
//! KLL-style quantile sketch for latency percentiles.
//!
//! Values enter level 0 with weight 1. A value at level `h` stands for `2^h`
//! originals. When the retained values exceed the total level budget, the
//! lowest over-full level is sorted and every other value (random offset)
//! is promoted one level up. Level budgets shrink geometrically by `2/3`
//! from the top level (which holds `capacity` values) down, so memory stays
//! `O(capacity + log(n / capacity))` regardless of stream length.
//!
//! Rank error: the returned value's true rank is within about
//! `2 / capacity * n` of `q * n` (`capacity = 200` gives 1%). The exact
//! minimum and maximum are tracked separately, so `q = 0` and `q = 1` are
//! exact. Answers are non-decreasing in `q`.

use crate::{StatsError, splitmix64};

const MIN_CAPACITY: usize = 8;
const LEVEL_DECAY: f64 = 2.0 / 3.0;

/// Bounded-memory rank summary over `f64` samples.
///
/// # Example
/// ```rust
/// use streamstats::quantile::QuantileSketch;
///
/// let mut sketch = QuantileSketch::new(200).unwrap();
/// for latency_ms in 1..=20_000 {
///     sketch.update(latency_ms as f64);
/// }
///
/// let p99 = sketch.quantile(0.99).unwrap();
/// assert!(p99 > 19_400.0 && p99 < 20_000.0);
/// ```
#[derive(Debug, Clone)]
pub struct QuantileSketch {
    capacity: usize,
    levels: Vec<Vec<f64>>,
    retained: usize,
    budget: usize,
    count: u64,
    min: f64,
    max: f64,
    rng_state: u64,
}

impl QuantileSketch {
    /// Creates a sketch whose top level holds `capacity` values.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidParameter`] when `capacity < 8`.
    pub fn new(capacity: usize) -> Result<Self, StatsError> {
        if capacity < MIN_CAPACITY {
            return Err(StatsError::InvalidParameter(
                "quantile capacity must be at least 8",
            ));
        }

        let mut sketch = Self {
            capacity,
            levels: vec![Vec::new()],
            retained: 0,
            budget: 0,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            rng_state: 0xD1B5_4A32_C192_ED03,
        };
        sketch.budget = sketch.total_budget();
        Ok(sketch)
    }

    /// Creates a sketch for a target normalized rank error.
    ///
    /// Uses `capacity = ceil(2 / rank_error)`.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidParameter`] for `rank_error` outside
    /// `(0, 1)`.
    pub fn with_error_rate(rank_error: f64) -> Result<Self, StatsError> {
        if !rank_error.is_finite() || rank_error <= 0.0 || rank_error >= 1.0 {
            return Err(StatsError::InvalidParameter(
                "rank_error must be finite and strictly between 0 and 1",
            ));
        }
        Self::new(((2.0 / rank_error).ceil() as usize).max(MIN_CAPACITY))
    }

    /// Returns the top-level compactor size `k`.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the normalized rank error bound `2 / capacity`.
    pub fn rank_error(&self) -> f64 {
        2.0 / self.capacity as f64
    }

    /// Returns the number of samples summarized.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the number of values currently held in memory.
    pub fn retained(&self) -> usize {
        self.retained
    }

    /// Returns `true` if no sample has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Adds one sample. Non-finite samples are ignored.
    pub fn update(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
        self.levels[0].push(value);
        self.retained += 1;
        self.compress();
    }

    /// Returns the approximate value at normalized rank `q`.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidParameter`] for `q` outside `[0, 1]` and
    /// [`StatsError::NoData`] for an empty sketch.
    pub fn quantile(&self, q: f64) -> Result<f64, StatsError> {
        let values = self.quantiles(&[q])?;
        Ok(values[0])
    }

    /// Answers several ranks from one sorted pass over the retained values.
    ///
    /// # Errors
    /// Same conditions as [`QuantileSketch::quantile`], for any entry of `qs`.
    pub fn quantiles(&self, qs: &[f64]) -> Result<Vec<f64>, StatsError> {
        if qs.iter().any(|q| !q.is_finite() || !(0.0..=1.0).contains(q)) {
            return Err(StatsError::InvalidParameter(
                "q must be finite and in [0, 1]",
            ));
        }
        if self.count == 0 {
            return Err(StatsError::NoData("quantile is undefined for an empty sketch"));
        }

        let weighted = self.sorted_weighted();
        let total_weight: u64 = weighted.iter().map(|&(_, weight)| weight).sum();

        Ok(qs
            .iter()
            .map(|&q| {
                if q == 0.0 {
                    return self.min;
                }
                if q == 1.0 {
                    return self.max;
                }

                let target = ((total_weight - 1) as f64 * q).round() as u64;
                let mut cumulative = 0_u64;
                for &(value, weight) in &weighted {
                    cumulative += weight;
                    if cumulative > target {
                        return value;
                    }
                }
                self.max
            })
            .collect())
    }

    /// Folds `other` into this sketch.
    ///
    /// # Errors
    /// Returns [`StatsError::ConfigMismatch`] when capacities differ.
    pub fn merge(&mut self, other: &Self) -> Result<(), StatsError> {
        if self.capacity != other.capacity {
            return Err(StatsError::ConfigMismatch(
                "quantile capacity must match for merge",
            ));
        }
        if other.is_empty() {
            return Ok(());
        }

        if self.levels.len() < other.levels.len() {
            self.levels.resize_with(other.levels.len(), Vec::new);
            self.budget = self.total_budget();
        }
        for (level, values) in other.levels.iter().enumerate() {
            self.levels[level].extend_from_slice(values);
        }
        self.retained += other.retained;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.compress();
        Ok(())
    }

    /// Drops every retained sample.
    pub fn clear(&mut self) {
        self.levels = vec![Vec::new()];
        self.retained = 0;
        self.count = 0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
        self.budget = self.total_budget();
    }

    fn sorted_weighted(&self) -> Vec<(f64, u64)> {
        let mut weighted = Vec::with_capacity(self.retained);
        for (level, values) in self.levels.iter().enumerate() {
            let weight = 1_u64 << level;
            weighted.extend(values.iter().map(|&value| (value, weight)));
        }
        weighted.sort_unstable_by(|left, right| left.0.total_cmp(&right.0));
        weighted
    }

    fn level_capacity(&self, level: usize) -> usize {
        let depth_from_top = (self.levels.len() - 1 - level) as i32;
        let scaled = (self.capacity as f64 * LEVEL_DECAY.powi(depth_from_top)).ceil() as usize;
        scaled.max(2)
    }

    fn total_budget(&self) -> usize {
        (0..self.levels.len()).map(|level| self.level_capacity(level)).sum()
    }

    fn compress(&mut self) {
        while self.retained > self.budget {
            let over_full = (0..self.levels.len())
                .find(|&level| self.levels[level].len() >= self.level_capacity(level));
            match over_full {
                Some(level) => self.compact_level(level),
                None => break,
            }
        }
    }

    /// Halves one level into the next, keeping an odd leftover in place.
    fn compact_level(&mut self, level: usize) {
        if level + 1 == self.levels.len() {
            self.levels.push(Vec::new());
            self.budget = self.total_budget();
        }

        let mut values = std::mem::take(&mut self.levels[level]);
        values.sort_unstable_by(f64::total_cmp);
        let carry = if values.len() % 2 == 1 { values.pop() } else { None };

        let offset = (self.next_u64() & 1) as usize;
        let promoted: Vec<f64> = values.iter().skip(offset).step_by(2).copied().collect();
        self.retained -= values.len() - promoted.len();
        self.levels[level + 1].extend(promoted);

        if let Some(value) = carry {
            self.levels[level].push(value);
        }
    }

    fn next_u64(&mut self) -> u64 {
        self.rng_state = splitmix64(self.rng_state);
        self.rng_state
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::QuantileSketch;
    use crate::StatsError;

    fn uniform(capacity: usize, n: u64) -> QuantileSketch {
        let mut sketch = QuantileSketch::new(capacity).unwrap();
        for value in 0..n {
            sketch.update(value as f64);
        }
        sketch
    }

    #[test]
    fn constructor_validates_capacity() {
        assert!(QuantileSketch::new(7).is_err());
        assert!(QuantileSketch::new(8).is_ok());
        assert_eq!(QuantileSketch::with_error_rate(0.01).unwrap().capacity(), 200);
        assert!(QuantileSketch::with_error_rate(0.0).is_err());
    }

    #[test]
    fn empty_sketch_reports_no_data() {
        let sketch = QuantileSketch::new(64).unwrap();
        assert!(matches!(sketch.quantile(0.5), Err(StatsError::NoData(_))));
    }

    #[test]
    fn out_of_range_q_is_rejected() {
        let sketch = uniform(64, 10);
        assert!(sketch.quantile(-0.1).is_err());
        assert!(sketch.quantile(1.1).is_err());
        assert!(sketch.quantile(f64::NAN).is_err());
    }

    #[test]
    fn small_streams_are_exact() {
        let sketch = uniform(64, 11);
        assert_eq!(sketch.quantile(0.5).unwrap(), 5.0);
        assert_eq!(sketch.quantile(0.0).unwrap(), 0.0);
        assert_eq!(sketch.quantile(1.0).unwrap(), 10.0);
    }

    #[test]
    fn ranks_stay_within_error_bound() {
        let n = 100_000;
        let sketch = uniform(200, n);
        let tolerance = 1.5 * sketch.rank_error() * n as f64;

        for q in [0.01, 0.1, 0.5, 0.9, 0.99] {
            // Values equal their rank in a 0..n stream.
            let estimate = sketch.quantile(q).unwrap();
            let expected = q * (n - 1) as f64;
            assert!(
                (estimate - expected).abs() <= tolerance,
                "q={q} estimate={estimate} expected={expected}"
            );
        }
    }

    #[test]
    fn memory_is_independent_of_stream_length() {
        let sketch = uniform(64, 500_000);
        assert_eq!(sketch.count(), 500_000);
        assert!(sketch.retained() <= 4 * sketch.capacity(), "retained={}", sketch.retained());
    }

    #[test]
    fn endpoints_are_exact_after_compaction() {
        let mut sketch = QuantileSketch::new(16).unwrap();
        for value in (0..10_000).rev() {
            sketch.update(f64::from(value) * 0.5);
        }
        assert_eq!(sketch.quantile(0.0).unwrap(), 0.0);
        assert_eq!(sketch.quantile(1.0).unwrap(), 4_999.5);
    }

    #[test]
    fn non_finite_samples_are_ignored() {
        let mut sketch = QuantileSketch::new(16).unwrap();
        sketch.update(f64::NAN);
        sketch.update(f64::INFINITY);
        assert!(sketch.is_empty());
    }

    #[test]
    fn merge_combines_streams() {
        let mut left = QuantileSketch::new(200).unwrap();
        let mut right = QuantileSketch::new(200).unwrap();
        for value in 0..10_000 {
            left.update(f64::from(value));
        }
        for value in 10_000..20_000 {
            right.update(f64::from(value));
        }

        left.merge(&right).unwrap();
        assert_eq!(left.count(), 20_000);
        let p95 = left.quantile(0.95).unwrap();
        assert!((p95 - 19_000.0).abs() <= 600.0, "p95={p95}");
        assert_eq!(left.quantile(1.0).unwrap(), 19_999.0);
    }

    #[test]
    fn merge_rejects_different_capacity() {
        let mut left = QuantileSketch::new(100).unwrap();
        let right = QuantileSketch::new(101).unwrap();
        assert!(matches!(left.merge(&right), Err(StatsError::ConfigMismatch(_))));
    }

    #[test]
    fn clear_resets_state() {
        let mut sketch = uniform(32, 1_000);
        sketch.clear();
        assert!(sketch.is_empty());
        assert_eq!(sketch.retained(), 0);
        assert!(sketch.quantile(0.5).is_err());
    }

    proptest! {
        #[test]
        fn quantiles_are_monotonic_in_q(values in proptest::collection::vec(-1.0e6_f64..1.0e6, 1..3_000)) {
            let mut sketch = QuantileSketch::new(16).unwrap();
            for value in values {
                sketch.update(value);
            }

            let qs: Vec<f64> = (0..=100).map(|i| f64::from(i) / 100.0).collect();
            let answers = sketch.quantiles(&qs).unwrap();
            for pair in answers.windows(2) {
                prop_assert!(pair[0] <= pair[1], "{} > {}", pair[0], pair[1]);
            }
        }
    }
}
