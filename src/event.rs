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
//! Stream records and the snapshots derived from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::StatsError;

/// One immutable stream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Entity the event belongs to (user, client, route...).
    pub entity_id: String,
    /// Numeric field tracked by the rolling mean/variance.
    pub value: f64,
    /// Arrival or event time in seconds.
    pub timestamp: f64,
    /// Latency-like field summarized into percentiles.
    pub latency: f64,
}

impl Event {
    /// Builds an event; call [`Event::validate`] before trusting its fields.
    pub fn new(entity_id: impl Into<String>, value: f64, timestamp: f64, latency: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            value,
            timestamp,
            latency,
        }
    }

    /// Checks that the numeric fields can be folded into the estimators.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidEvent`] for a non-finite `value` or
    /// `latency`.
    pub fn validate(&self) -> Result<(), StatsError> {
        if !self.value.is_finite() {
            return Err(StatsError::InvalidEvent("value must be finite"));
        }
        if !self.latency.is_finite() {
            return Err(StatsError::InvalidEvent("latency must be finite"));
        }
        Ok(())
    }
}

/// p50/p90/p99 of the latency field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

/// Point-in-time view of one stream's statistics.
///
/// Optional fields are `None` until enough samples exist (one for the mean
/// and percentiles, two for the sample variance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// Seconds since the Unix epoch at which the snapshot was taken.
    pub timestamp: f64,
    /// Events folded into the aggregator so far.
    pub events_processed: u64,
    pub unique_count_estimate: u64,
    /// Heaviest candidate entities, highest estimated count first.
    pub top_entities: Vec<(String, u64)>,
    /// Most common values rounded to the nearest integer, with estimated
    /// counts, highest first.
    pub top_value_buckets: Vec<(f64, u64)>,
    /// Estimated counts for explicitly watched entities.
    pub watched_entities: BTreeMap<String, u64>,
    pub mean: Option<f64>,
    /// Sample variance (`n - 1` denominator).
    pub variance: Option<f64>,
    pub latency: Option<LatencyPercentiles>,
}

#[cfg(test)]
mod tests {
    use super::Event;
    use crate::StatsError;

    #[test]
    fn finite_event_is_valid() {
        assert!(Event::new("user-1", 1.5, 0.0, 0.02).validate().is_ok());
    }

    #[test]
    fn non_finite_fields_are_rejected() {
        let bad_value = Event::new("user-1", f64::NAN, 0.0, 0.02);
        let bad_latency = Event::new("user-1", 1.0, 0.0, f64::INFINITY);
        assert!(matches!(bad_value.validate(), Err(StatsError::InvalidEvent(_))));
        assert!(matches!(bad_latency.validate(), Err(StatsError::InvalidEvent(_))));
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::new("user-7", 3.25, 1_700_000_000.5, 0.004);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<Event>(&json).unwrap(), event);
    }
}
