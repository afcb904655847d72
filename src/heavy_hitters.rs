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
//! Bounded candidate set for frequent-entity reporting.
//!
//! The Count-Min sketch can answer a point query for any key but cannot list
//! its keys. The aggregator therefore keeps at most `capacity` candidates,
//! each with the last frequency estimate seen for it. A new key displaces
//! the weakest candidate only when its estimate is strictly higher, so the
//! set converges on the heaviest keys without growing with the key space.

use std::collections::HashMap;

use crate::StatsError;

/// Fixed-size map from entity to its most recent frequency estimate.
///
/// # Example
/// ```rust
/// use streamstats::heavy_hitters::TopKCandidates;
///
/// let mut candidates = TopKCandidates::new(2).unwrap();
/// candidates.offer("apple", 100);
/// candidates.offer("banana", 80);
/// candidates.offer("carrot", 10);
///
/// let keys: Vec<_> = candidates.top(2).into_iter().map(|(key, _)| key).collect();
/// assert_eq!(keys, vec!["apple".to_string(), "banana".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct TopKCandidates {
    capacity: usize,
    entries: HashMap<String, u64>,
}

impl TopKCandidates {
    /// # Errors
    /// Returns [`StatsError::InvalidParameter`] when `capacity == 0`.
    pub fn new(capacity: usize) -> Result<Self, StatsError> {
        if capacity == 0 {
            return Err(StatsError::InvalidParameter(
                "candidate capacity must be greater than zero",
            ));
        }

        Ok(Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
        })
    }

    /// Returns the maximum number of tracked candidates.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of tracked candidates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no candidate is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `key` is currently a candidate.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterates over tracked keys in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Records `estimate` for `key`, admitting it if there is room or if it
    /// beats the current weakest candidate.
    pub fn offer(&mut self, key: &str, estimate: u64) {
        if let Some(current) = self.entries.get_mut(key) {
            *current = estimate;
            return;
        }

        if self.entries.len() < self.capacity {
            self.entries.insert(key.to_owned(), estimate);
            return;
        }

        let weakest = self
            .entries
            .iter()
            .min_by(|left, right| left.1.cmp(right.1).then_with(|| right.0.cmp(left.0)))
            .map(|(tracked, &count)| (tracked.clone(), count));

        if let Some((weakest_key, weakest_count)) = weakest {
            if estimate > weakest_count {
                self.entries.remove(&weakest_key);
                self.entries.insert(key.to_owned(), estimate);
            }
        }
    }

    /// Returns up to `k` candidates, highest estimate first, ties by key.
    pub fn top(&self, k: usize) -> Vec<(String, u64)> {
        let mut ranked: Vec<_> = self
            .entries
            .iter()
            .map(|(key, &count)| (key.clone(), count))
            .collect();
        ranked.sort_unstable_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
        ranked.truncate(k);
        ranked
    }

    /// Drops every candidate.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
