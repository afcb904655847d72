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
//! Count-Min sketch for approximate per-key frequencies.
//!
//! Each of the `d` rows hashes the key with its own seed into one of `w`
//! counters. A point query takes the minimum across rows, so estimates never
//! fall below the true count. With probability at least `1 - e^-d` the
//! overshoot is at most `e * N / w` where `N` is the total inserted count.
//!
//! Counters only grow. There is no decrement: removing counts would break the
//! one-sided error guarantee. Counters saturate at `u64::MAX` instead of
//! wrapping, which degrades accuracy for that cell but never corrupts it.

use crate::{StatsError, hash64, splitmix64};

const SEED_BASE: u64 = 0xC0DE_0F5E_ED5A_17ED;

/// Increment-only frequency sketch with `depth` rows of `width` counters.
///
/// # Example
/// ```rust
/// use streamstats::count_min::CountMinSketch;
///
/// let mut sketch = CountMinSketch::with_dimensions(1_000, 5).unwrap();
/// sketch.add("user:123", 4);
/// sketch.increment("user:123");
/// assert!(sketch.estimate("user:123") >= 5);
/// ```
#[derive(Debug, Clone)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    counters: Vec<u64>,
    seeds: Vec<u64>,
    total_count: u64,
    saturated: bool,
}

impl CountMinSketch {
    /// Builds a sketch from error bounds.
    ///
    /// `epsilon` is the additive error as a fraction of the total count and
    /// `delta` the failure probability. Both must be in `(0, 1)`.
    ///
    /// Width is `ceil(e / epsilon)` and depth is `ceil(ln(1 / delta))`.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidParameter`] when bounds are invalid.
    pub fn new(epsilon: f64, delta: f64) -> Result<Self, StatsError> {
        if !epsilon.is_finite() || epsilon <= 0.0 || epsilon >= 1.0 {
            return Err(StatsError::InvalidParameter(
                "epsilon must be finite and strictly between 0 and 1",
            ));
        }
        if !delta.is_finite() || delta <= 0.0 || delta >= 1.0 {
            return Err(StatsError::InvalidParameter(
                "delta must be finite and strictly between 0 and 1",
            ));
        }

        let width = (std::f64::consts::E / epsilon).ceil() as usize;
        let depth = (1.0 / delta).ln().ceil() as usize;
        Self::with_dimensions(width.max(1), depth.max(1))
    }

    /// Builds a sketch with explicit `width` (counters per row) and `depth`
    /// (rows).
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidParameter`] when either dimension is zero
    /// or the table size overflows.
    pub fn with_dimensions(width: usize, depth: usize) -> Result<Self, StatsError> {
        if width == 0 {
            return Err(StatsError::InvalidParameter("width must be greater than zero"));
        }
        if depth == 0 {
            return Err(StatsError::InvalidParameter("depth must be greater than zero"));
        }
        let table_len = width
            .checked_mul(depth)
            .ok_or(StatsError::InvalidParameter("width * depth overflows usize"))?;

        let seeds = (0..depth as u64)
            .map(|row| splitmix64(SEED_BASE ^ row))
            .collect();

        Ok(Self {
            width,
            depth,
            counters: vec![0; table_len],
            seeds,
            total_count: 0,
            saturated: false,
        })
    }

    /// Returns the number of counters per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the number of rows.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the total inserted count (saturating).
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Returns `true` if nothing has been added yet.
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    /// Returns `true` once any counter or the total has hit `u64::MAX`.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// Returns the additive error bound `e * N / w` that holds with
    /// probability `1 - e^-d`.
    pub fn error_bound(&self) -> f64 {
        std::f64::consts::E * self.total_count as f64 / self.width as f64
    }

    /// Adds `count` occurrences of `key` to every row.
    pub fn add(&mut self, key: impl AsRef<[u8]>, count: u64) {
        if count == 0 {
            return;
        }

        let key = key.as_ref();
        for row in 0..self.depth {
            let idx = self.counter_index(row, key);
            let (sum, overflowed) = self.counters[idx].overflowing_add(count);
            self.counters[idx] = if overflowed { u64::MAX } else { sum };
            self.saturated |= overflowed;
        }

        let (total, overflowed) = self.total_count.overflowing_add(count);
        self.total_count = if overflowed { u64::MAX } else { total };
        self.saturated |= overflowed;
    }

    /// Adds a single occurrence of `key`.
    pub fn increment(&mut self, key: impl AsRef<[u8]>) {
        self.add(key, 1);
    }

    /// Returns the minimum counter across rows for `key`.
    ///
    /// The result is never lower than the true count.
    pub fn estimate(&self, key: impl AsRef<[u8]>) -> u64 {
        let key = key.as_ref();
        (0..self.depth)
            .map(|row| self.counters[self.counter_index(row, key)])
            .min()
            .unwrap_or(0)
    }

    /// Resets every counter to zero, keeping the seeds.
    pub fn clear(&mut self) {
        self.counters.fill(0);
        self.total_count = 0;
        self.saturated = false;
    }

    /// Adds `other`'s counters into this sketch cell by cell.
    ///
    /// # Errors
    /// Returns [`StatsError::ConfigMismatch`] unless width, depth and seeds
    /// all match; `self` is left untouched.
    pub fn merge(&mut self, other: &Self) -> Result<(), StatsError> {
        if self.width != other.width || self.depth != other.depth {
            return Err(StatsError::ConfigMismatch(
                "width/depth must match for merge",
            ));
        }
        if self.seeds != other.seeds {
            return Err(StatsError::ConfigMismatch("hash seeds must match for merge"));
        }

        for (left, &right) in self.counters.iter_mut().zip(&other.counters) {
            let (sum, overflowed) = left.overflowing_add(right);
            *left = if overflowed { u64::MAX } else { sum };
            self.saturated |= overflowed;
        }
        let (total, overflowed) = self.total_count.overflowing_add(other.total_count);
        self.total_count = if overflowed { u64::MAX } else { total };
        self.saturated |= overflowed || other.saturated;
        Ok(())
    }

    fn counter_index(&self, row: usize, key: &[u8]) -> usize {
        let column = (hash64(key, self.seeds[row]) % self.width as u64) as usize;
        row * self.width + column
    }
}
