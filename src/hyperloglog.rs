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
//! HyperLogLog distinct-entity estimator.
//!
//! Keys are hashed with [`crate::hash64`]. The low `p` bits of the hash pick
//! one of `m = 2^p` registers and the remaining `64 - p` bits supply the
//! leading-zero run. The estimate applies:
//! - small-range linear counting while empty registers remain,
//! - large-range correction near the limit of the 64-bit hash space.
//!
//! Standard error is about `1.04 / sqrt(m)`.

use crate::{StatsError, hash64};

const MIN_PRECISION: u8 = 4;
const MAX_PRECISION: u8 = 18;
const HASH_SEED: u64 = 0x5EED_CA4D_1A11_7E5E;

/// Approximate distinct counter over byte-string keys.
///
/// # Example
/// ```rust
/// use streamstats::hyperloglog::HyperLogLog;
///
/// let mut hll = HyperLogLog::new(12).unwrap();
/// for i in 0..10_000_u64 {
///     hll.add(format!("user-{i}"));
/// }
///
/// let estimate = hll.count();
/// assert!(estimate > 9_000 && estimate < 11_000);
/// ```
#[derive(Debug, Clone)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
    insertions: u64,
}

impl HyperLogLog {
    /// Creates an estimator with `2^precision` registers.
    ///
    /// Valid range is `[4, 18]`.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidParameter`] when precision is out of range.
    pub fn new(precision: u8) -> Result<Self, StatsError> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(StatsError::InvalidParameter(
                "register bits must be in the inclusive range [4, 18]",
            ));
        }

        Ok(Self {
            precision,
            registers: vec![0; 1_usize << precision],
            insertions: 0,
        })
    }

    /// Creates an estimator sized for a target relative error.
    ///
    /// Uses `p = ceil(log2((1.04 / error)^2))`, clamped to `[4, 18]`.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidParameter`] when `relative_error` is not in
    /// `(0, 1)`.
    pub fn with_error_rate(relative_error: f64) -> Result<Self, StatsError> {
        if !relative_error.is_finite() || relative_error <= 0.0 || relative_error >= 1.0 {
            return Err(StatsError::InvalidParameter(
                "relative_error must be finite and strictly between 0 and 1",
            ));
        }

        let required_registers = (1.04 / relative_error).powi(2);
        let precision = (required_registers.log2().ceil() as u8).clamp(MIN_PRECISION, MAX_PRECISION);
        Self::new(precision)
    }

    /// Returns the number of index bits `p`.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Returns `m = 2^p`.
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    /// Returns `1.04 / sqrt(m)`.
    pub fn expected_relative_error(&self) -> f64 {
        1.04 / (self.register_count() as f64).sqrt()
    }

    /// Returns how many keys were added, duplicates included.
    pub fn insertions(&self) -> u64 {
        self.insertions
    }

    /// Returns `true` if no item has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|&register| register == 0)
    }

    /// Records one key.
    pub fn add(&mut self, key: impl AsRef<[u8]>) {
        let hash = hash64(key.as_ref(), HASH_SEED);
        let index = (hash & (self.register_count() as u64 - 1)) as usize;
        let rank = Self::rank(hash, self.precision);

        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
        self.insertions = self.insertions.saturating_add(1);
    }

    /// Returns the estimated number of distinct keys.
    pub fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }

        let m = self.register_count() as f64;
        let harmonic_sum: f64 = self
            .registers
            .iter()
            .map(|&register| 2_f64.powi(-i32::from(register)))
            .sum();
        let raw = Self::alpha(self.register_count()) * m * m / harmonic_sum;

        let zero_registers = self.registers.iter().filter(|&&register| register == 0).count();
        let corrected = if raw <= 2.5 * m && zero_registers > 0 {
            m * (m / zero_registers as f64).ln()
        } else {
            raw
        };

        let two_to_64 = (u64::MAX as f64) + 1.0;
        if corrected > two_to_64 / 30.0 {
            let ratio = (corrected / two_to_64).min(1.0 - f64::EPSILON);
            -two_to_64 * (1.0 - ratio).ln()
        } else {
            corrected
        }
    }

    /// Returns the estimate rounded to `u64`.
    pub fn count(&self) -> u64 {
        self.estimate().round() as u64
    }

    /// Resets all registers to zero.
    pub fn clear(&mut self) {
        self.registers.fill(0);
        self.insertions = 0;
    }

    /// Folds `other` into `self` so the result estimates the union of both
    /// streams. Registers combine by element-wise max, which makes the merge
    /// commutative, associative and idempotent.
    ///
    /// # Errors
    /// Returns [`StatsError::ConfigMismatch`] when register counts differ;
    /// `self` is left untouched.
    pub fn merge(&mut self, other: &Self) -> Result<(), StatsError> {
        if self.precision != other.precision {
            return Err(StatsError::ConfigMismatch(
                "register count must match for merge",
            ));
        }

        for (left, &right) in self.registers.iter_mut().zip(&other.registers) {
            *left = (*left).max(right);
        }
        self.insertions = self.insertions.saturating_add(other.insertions);
        Ok(())
    }

    /// Returns the estimated union cardinality without mutating either side.
    ///
    /// # Errors
    /// Returns [`StatsError::ConfigMismatch`] when register counts differ.
    pub fn union_estimate(&self, other: &Self) -> Result<f64, StatsError> {
        let mut union = self.clone();
        union.merge(other)?;
        Ok(union.estimate())
    }

    /// Leading-zero run of the `64 - p` bits above the index, plus one.
    fn rank(hash: u64, precision: u8) -> u8 {
        let remaining = hash >> precision;
        let zeros = remaining.leading_zeros() - u32::from(precision);
        (zeros + 1) as u8
    }

    fn alpha(m: usize) -> f64 {
        match m {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HyperLogLog;

    fn filled(precision: u8, keys: impl IntoIterator<Item = String>) -> HyperLogLog {
        let mut hll = HyperLogLog::new(precision).unwrap();
        for key in keys {
            hll.add(key);
        }
        hll
    }

    #[test]
    fn precision_range_is_enforced() {
        assert!(HyperLogLog::new(3).is_err());
        assert!(HyperLogLog::new(4).is_ok());
        assert!(HyperLogLog::new(18).is_ok());
        assert!(HyperLogLog::new(19).is_err());
    }

    #[test]
    fn error_rate_constructor_validates_input() {
        assert!(HyperLogLog::with_error_rate(0.0).is_err());
        assert!(HyperLogLog::with_error_rate(1.0).is_err());
        assert!(HyperLogLog::with_error_rate(f64::NAN).is_err());
        assert_eq!(HyperLogLog::with_error_rate(0.05).unwrap().precision(), 9);
    }

    #[test]
    fn empty_sketch_estimates_zero() {
        let hll = HyperLogLog::new(10).unwrap();
        assert!(hll.is_empty());
        assert_eq!(hll.count(), 0);
    }

    #[test]
    fn rank_counts_zeros_above_index_bits() {
        // Index bits are the low 10; bit 63 set means no leading zeros.
        assert_eq!(HyperLogLog::rank(1 << 63, 10), 1);
        assert_eq!(HyperLogLog::rank(1 << 62, 10), 2);
        assert_eq!(HyperLogLog::rank(0x3FF, 10), 55);
    }

    #[test]
    fn duplicates_do_not_inflate_the_estimate() {
        let mut hll = HyperLogLog::new(12).unwrap();
        for _ in 0..1_000 {
            hll.add("same-key");
        }
        assert!(hll.count() <= 2);
        assert_eq!(hll.insertions(), 1_000);
    }

    #[test]
    fn estimates_stay_within_three_standard_errors_across_trials() {
        let precision = 10;
        let exact = 20_000_f64;
        let trials = 20;
        let mut within = 0;

        for trial in 0..trials {
            let hll = filled(precision, (0..20_000).map(|i| format!("trial-{trial}-entity-{i}")));
            let bound = 3.0 * hll.expected_relative_error();
            if ((hll.estimate() - exact) / exact).abs() <= bound {
                within += 1;
            }
        }

        assert!(within >= trials - 1, "only {within}/{trials} trials within 3 sigma");
    }

    #[test]
    fn small_cardinalities_use_linear_counting() {
        let hll = filled(12, (0..100).map(|i| format!("k{i}")));
        let estimate = hll.estimate();
        assert!((estimate - 100.0).abs() <= 5.0, "estimate={estimate}");
    }

    #[test]
    fn merge_estimates_union_of_key_sets() {
        let mut left = filled(12, (0..10_000).map(|i| format!("id-{i}")));
        let right = filled(12, (5_000..15_000).map(|i| format!("id-{i}")));

        left.merge(&right).unwrap();
        let relative_error = (left.estimate() - 15_000.0).abs() / 15_000.0;
        assert!(relative_error <= 3.0 * left.expected_relative_error(), "rel={relative_error}");
    }

    #[test]
    fn merge_is_commutative_and_associative() {
        let a = filled(10, (0..3_000).map(|i| format!("a{i}")));
        let b = filled(10, (0..2_000).map(|i| format!("b{i}")));
        let c = filled(10, (1_000..4_000).map(|i| format!("a{i}")));

        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();
        assert_eq!(ab.registers, ba.registers);

        let mut ab_c = ab.clone();
        ab_c.merge(&c).unwrap();
        let mut bc = b.clone();
        bc.merge(&c).unwrap();
        let mut a_bc = a.clone();
        a_bc.merge(&bc).unwrap();
        assert_eq!(ab_c.registers, a_bc.registers);
        assert_eq!(ab_c.estimate(), a_bc.estimate());
    }

    #[test]
    fn merge_rejects_mismatched_precision() {
        let mut left = filled(10, (0..50).map(|i| i.to_string()));
        let before = left.registers.clone();
        let right = HyperLogLog::new(11).unwrap();
        assert!(left.merge(&right).is_err());
        assert!(left.union_estimate(&right).is_err());
        assert_eq!(left.registers, before);
    }

    #[test]
    fn estimate_does_not_mutate_state() {
        let hll = filled(8, (0..500).map(|i| i.to_string()));
        let before = hll.registers.clone();
        let first = hll.estimate();
        assert_eq!(first, hll.estimate());
        assert_eq!(hll.registers, before);
    }

    #[test]
    fn clear_removes_state() {
        let mut hll = filled(12, (0..500).map(|i| i.to_string()));
        assert!(hll.count() > 0);
        hll.clear();
        assert_eq!(hll.count(), 0);
        assert_eq!(hll.insertions(), 0);
    }
}
