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
//! Per-stream composition of the four estimators.
//!
//! `update` validates the event first and only then touches the estimators,
//! so a call either applies to all four or to none. `snapshot` only reads.
//!
//! Besides per-entity frequencies the aggregator counts values rounded to
//! the nearest integer (ties to even) in a second Count-Min sketch of the
//! same shape, and keeps a small candidate set of the most common buckets.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::count_min::CountMinSketch;
use crate::event::{AggregateSnapshot, Event, LatencyPercentiles};
use crate::heavy_hitters::TopKCandidates;
use crate::hyperloglog::HyperLogLog;
use crate::moments::RollingMoments;
use crate::quantile::QuantileSketch;
use crate::StatsError;

const REPORTED_PERCENTILES: [f64; 3] = [0.50, 0.90, 0.99];

/// Owns one instance of every estimator for a single logical stream.
///
/// # Example
/// ```rust
/// use streamstats::{Event, StatisticsAggregator, StreamConfig};
///
/// let mut aggregator = StatisticsAggregator::new(&StreamConfig::default()).unwrap();
/// for i in 0..1_000 {
///     let event = Event::new(format!("user-{}", i % 50), i as f64, 0.0, 0.010);
///     aggregator.update(&event).unwrap();
/// }
///
/// let snapshot = aggregator.snapshot();
/// assert_eq!(snapshot.events_processed, 1_000);
/// assert!(snapshot.unique_count_estimate >= 45 && snapshot.unique_count_estimate <= 55);
/// ```
#[derive(Debug, Clone)]
pub struct StatisticsAggregator {
    cardinality: HyperLogLog,
    frequencies: CountMinSketch,
    values: RollingMoments,
    latencies: QuantileSketch,
    candidates: TopKCandidates,
    buckets: CountMinSketch,
    bucket_candidates: TopKCandidates,
    watched: Vec<String>,
    events_processed: u64,
    saturation_reported: bool,
}

impl StatisticsAggregator {
    /// Builds every estimator from `config`.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: &StreamConfig) -> Result<Self, StatsError> {
        config.validate()?;

        Ok(Self {
            cardinality: HyperLogLog::new(config.hll_register_bits)?,
            frequencies: CountMinSketch::with_dimensions(config.cms_width, config.cms_depth)?,
            values: RollingMoments::new(),
            latencies: QuantileSketch::new(config.quantile_summary_capacity)?,
            candidates: TopKCandidates::new(config.top_k)?,
            buckets: CountMinSketch::with_dimensions(config.cms_width, config.cms_depth)?,
            bucket_candidates: TopKCandidates::new(config.top_value_buckets)?,
            watched: config.watched_entities.clone(),
            events_processed: 0,
            saturation_reported: false,
        })
    }

    /// Folds one event into all estimators.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidEvent`] for non-finite numeric fields or a
    /// value the moments cannot absorb; no estimator is modified in that case.
    pub fn update(&mut self, event: &Event) -> Result<(), StatsError> {
        event.validate()?;
        let values = self.values.with_value(event.value)?;

        let entity = event.entity_id.as_str();
        self.cardinality.add(entity);
        self.frequencies.increment(entity);
        self.values = values;
        self.latencies.update(event.latency);
        self.candidates.offer(entity, self.frequencies.estimate(entity));

        let bucket = value_bucket(event.value);
        self.buckets.increment(&bucket);
        self.bucket_candidates.offer(&bucket, self.buckets.estimate(&bucket));
        self.events_processed += 1;

        if (self.frequencies.is_saturated() || self.buckets.is_saturated())
            && !self.saturation_reported
        {
            self.saturation_reported = true;
            warn!(
                events = self.events_processed,
                "frequency counters saturated; estimates for hot entities are now capped"
            );
        }
        Ok(())
    }

    /// Returns the number of events folded in.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Distinct-entity estimator.
    pub fn cardinality(&self) -> &HyperLogLog {
        &self.cardinality
    }

    /// Per-entity frequency sketch.
    pub fn frequencies(&self) -> &CountMinSketch {
        &self.frequencies
    }

    /// Running moments of the `value` field.
    pub fn values(&self) -> &RollingMoments {
        &self.values
    }

    /// Quantile sketch of the `latency` field.
    pub fn latencies(&self) -> &QuantileSketch {
        &self.latencies
    }

    /// Estimated number of events seen for `entity_id`.
    pub fn frequency(&self, entity_id: &str) -> u64 {
        self.frequencies.estimate(entity_id)
    }

    /// Estimated number of events whose value rounds to the same bucket as
    /// `value`.
    pub fn value_frequency(&self, value: f64) -> u64 {
        self.buckets.estimate(value_bucket(value))
    }

    /// Takes a snapshot stamped with the current wall-clock time.
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.snapshot_at(unix_now())
    }

    /// Takes a snapshot stamped with `timestamp` (seconds since the epoch).
    ///
    /// Top entities come from re-querying the frequency sketch for the
    /// bounded candidate set only.
    pub fn snapshot_at(&self, timestamp: f64) -> AggregateSnapshot {
        let mut top_entities: Vec<(String, u64)> = self
            .candidates
            .keys()
            .map(|key| (key.to_owned(), self.frequencies.estimate(key)))
            .collect();
        top_entities.sort_unstable_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));

        let mut top_value_buckets: Vec<(f64, u64)> = self
            .bucket_candidates
            .keys()
            .filter_map(|key| Some((key.parse::<f64>().ok()?, self.buckets.estimate(key))))
            .collect();
        top_value_buckets.sort_unstable_by(|left, right| {
            right.1.cmp(&left.1).then_with(|| left.0.total_cmp(&right.0))
        });

        let watched_entities: BTreeMap<String, u64> = self
            .watched
            .iter()
            .map(|key| (key.clone(), self.frequencies.estimate(key)))
            .collect();

        let latency = self
            .latencies
            .quantiles(&REPORTED_PERCENTILES)
            .ok()
            .map(|values| LatencyPercentiles {
                p50: values[0],
                p90: values[1],
                p99: values[2],
            });

        AggregateSnapshot {
            timestamp,
            events_processed: self.events_processed,
            unique_count_estimate: self.cardinality.count(),
            top_entities,
            top_value_buckets,
            watched_entities,
            mean: self.values.mean().ok(),
            variance: self.values.sample_variance().ok(),
            latency,
        }
    }

    /// Folds another stream's aggregator into this one.
    ///
    /// Both sides must have been built from equivalent estimator settings.
    /// Shapes are checked before anything is modified, so a mismatch leaves
    /// `self` unchanged.
    ///
    /// # Errors
    /// Returns [`StatsError::ConfigMismatch`] on any shape difference.
    pub fn merge(&mut self, other: &Self) -> Result<(), StatsError> {
        if self.cardinality.precision() != other.cardinality.precision() {
            return Err(StatsError::ConfigMismatch("hll_register_bits must match for merge"));
        }
        if self.frequencies.width() != other.frequencies.width()
            || self.frequencies.depth() != other.frequencies.depth()
        {
            return Err(StatsError::ConfigMismatch("cms dimensions must match for merge"));
        }
        if self.latencies.capacity() != other.latencies.capacity() {
            return Err(StatsError::ConfigMismatch(
                "quantile_summary_capacity must match for merge",
            ));
        }

        self.cardinality.merge(&other.cardinality)?;
        self.frequencies.merge(&other.frequencies)?;
        self.buckets.merge(&other.buckets)?;
        self.latencies.merge(&other.latencies)?;
        self.values.merge(&other.values);
        self.events_processed += other.events_processed;

        let keys: Vec<String> = self
            .candidates
            .keys()
            .chain(other.candidates.keys())
            .map(str::to_owned)
            .collect();
        for key in keys {
            self.candidates.offer(&key, self.frequencies.estimate(&key));
        }
        let buckets: Vec<String> = self
            .bucket_candidates
            .keys()
            .chain(other.bucket_candidates.keys())
            .map(str::to_owned)
            .collect();
        for key in buckets {
            self.bucket_candidates.offer(&key, self.buckets.estimate(&key));
        }
        for key in &other.watched {
            if !self.watched.contains(key) {
                self.watched.push(key.clone());
            }
        }

        debug!(
            events = self.events_processed,
            unique = self.cardinality.count(),
            "merged aggregator"
        );
        Ok(())
    }
}

/// Key of the integer bucket `value` falls into.
fn value_bucket(value: f64) -> String {
    // `+ 0.0` folds -0.0 into 0.0 so both print as "0".
    format!("{}", value.round_ties_even() + 0.0)
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::StatisticsAggregator;
    use crate::config::StreamConfig;
    use crate::event::Event;
    use crate::StatsError;

    fn aggregator() -> StatisticsAggregator {
        StatisticsAggregator::new(&StreamConfig {
            top_k: 3,
            watched_entities: vec!["123".to_string(), "never".to_string()],
            ..Default::default()
        })
        .unwrap()
    }

    fn event(entity: &str, value: f64, latency: f64) -> Event {
        Event::new(entity, value, 0.0, latency)
    }

    #[test]
    fn rejects_invalid_config() {
        let config = StreamConfig { cms_depth: 0, ..Default::default() };
        assert!(StatisticsAggregator::new(&config).is_err());
    }

    #[test]
    fn empty_snapshot_has_no_statistics() {
        let snapshot = aggregator().snapshot_at(10.0);
        assert_eq!(snapshot.timestamp, 10.0);
        assert_eq!(snapshot.events_processed, 0);
        assert_eq!(snapshot.unique_count_estimate, 0);
        assert!(snapshot.top_entities.is_empty());
        assert_eq!(snapshot.watched_entities["123"], 0);
        assert!(snapshot.mean.is_none());
        assert!(snapshot.variance.is_none());
        assert!(snapshot.latency.is_none());
    }

    #[test]
    fn update_routes_every_field() {
        let mut aggregator = aggregator();
        for (value, entity) in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().zip(["a", "b", "a", "123"].into_iter().cycle()) {
            aggregator.update(&event(entity, value, value / 100.0)).unwrap();
        }

        let snapshot = aggregator.snapshot_at(1.0);
        assert_eq!(snapshot.events_processed, 8);
        assert_eq!(snapshot.unique_count_estimate, 3);
        assert_eq!(snapshot.mean, Some(5.0));
        assert!((snapshot.variance.unwrap() - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(snapshot.top_entities[0], ("a".to_string(), 4));
        assert_eq!(snapshot.watched_entities["123"], 2);
        assert_eq!(snapshot.watched_entities["never"], 0);

        let latency = snapshot.latency.unwrap();
        assert!(latency.p50 <= latency.p90 && latency.p90 <= latency.p99);
        assert_eq!(latency.p99, 0.09);
    }

    #[test]
    fn invalid_event_leaves_state_untouched() {
        let mut aggregator = aggregator();
        aggregator.update(&event("x", 1.0, 0.1)).unwrap();
        let before = aggregator.snapshot_at(0.0);

        let err = aggregator.update(&event("y", f64::NAN, 0.1)).unwrap_err();
        assert!(matches!(err, StatsError::InvalidEvent(_)));
        assert!(aggregator.update(&event("y", 1.0, f64::INFINITY)).is_err());

        assert_eq!(aggregator.snapshot_at(0.0), before);
        assert_eq!(aggregator.cardinality().insertions(), 1);
    }

    #[test]
    fn value_too_far_from_mean_leaves_state_untouched() {
        let mut aggregator = aggregator();
        aggregator.update(&event("big", 1.0e308, 0.1)).unwrap();
        let before = aggregator.snapshot_at(0.0);

        let err = aggregator.update(&event("other", -1.0e308, 0.2)).unwrap_err();
        assert!(matches!(err, StatsError::InvalidEvent(_)));

        assert_eq!(aggregator.snapshot_at(0.0), before);
        assert_eq!(aggregator.cardinality().insertions(), 1);
        assert_eq!(aggregator.latencies().count(), 1);
        assert_eq!(aggregator.frequency("other"), 0);
        assert_eq!(before.mean, Some(1.0e308));
    }

    #[test]
    fn most_common_rounded_values_are_reported() {
        let mut aggregator = aggregator();
        for value in [49.6, 50.2, 50.4, 50.5, 51.5, 12.0, -0.3, 0.2] {
            aggregator.update(&event("v", value, 0.01)).unwrap();
        }

        let buckets = aggregator.snapshot_at(0.0).top_value_buckets;
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0], (50.0, 4));
        assert_eq!(buckets[1], (0.0, 2));
        assert_eq!(buckets[2].1, 1);
        assert_eq!(aggregator.value_frequency(50.49), 4);
        assert_eq!(aggregator.value_frequency(-0.4), 2);
    }

    #[test]
    fn top_entities_are_bounded_and_ordered() {
        let mut aggregator = aggregator();
        for i in 0..500 {
            aggregator.update(&event(&format!("noise-{i}"), 1.0, 0.01)).unwrap();
        }
        for _ in 0..50 {
            aggregator.update(&event("hot", 1.0, 0.01)).unwrap();
            aggregator.update(&event("warm", 1.0, 0.01)).unwrap();
        }
        for _ in 0..10 {
            aggregator.update(&event("hot", 1.0, 0.01)).unwrap();
        }

        let top = aggregator.snapshot_at(0.0).top_entities;
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].0, "hot");
        assert!(top[0].1 >= 60);
        assert_eq!(top[1].0, "warm");
        assert!(top.windows(2).all(|pair| pair[0].1 >= pair[1].1));
    }

    #[test]
    fn interleaved_snapshots_agree_with_insertions() {
        let mut aggregator = aggregator();
        for i in 0..2_000_u64 {
            aggregator.update(&event(&format!("e{}", i % 97), i as f64, 0.001)).unwrap();
            if i % 37 == 0 {
                let snapshot = aggregator.snapshot_at(i as f64);
                assert_eq!(snapshot.events_processed, i + 1);
                assert_eq!(aggregator.values().count(), aggregator.cardinality().insertions());
                assert_eq!(aggregator.latencies().count(), snapshot.events_processed);
            }
        }
    }

    #[test]
    fn merge_combines_two_streams() {
        let mut left = aggregator();
        let mut right = aggregator();
        for i in 0..3_000 {
            left.update(&event(&format!("user-{i}"), 10.0, 0.01)).unwrap();
            right.update(&event(&format!("user-{}", i + 1_500), 20.0, 0.02)).unwrap();
        }

        left.merge(&right).unwrap();
        let snapshot = left.snapshot_at(0.0);
        assert_eq!(snapshot.events_processed, 6_000);
        assert_eq!(snapshot.mean, Some(15.0));
        assert_eq!(snapshot.top_value_buckets[0], (10.0, 3_000));
        assert_eq!(snapshot.top_value_buckets[1], (20.0, 3_000));
        let relative_error = (snapshot.unique_count_estimate as f64 - 4_500.0).abs() / 4_500.0;
        assert!(relative_error <= 3.0 * left.cardinality().expected_relative_error());
    }

    #[test]
    fn merge_rejects_mismatched_shapes() {
        let mut left = aggregator();
        left.update(&event("kept", 1.0, 0.1)).unwrap();
        let other = StatisticsAggregator::new(&StreamConfig { cms_width: 64, ..Default::default() }).unwrap();

        assert!(matches!(left.merge(&other), Err(StatsError::ConfigMismatch(_))));
        assert_eq!(left.events_processed(), 1);
    }
}
