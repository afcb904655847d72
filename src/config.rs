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
//! Stream configuration.
//!
//! Each option sizes exactly one estimator or pipeline stage; none of them
//! constrain each other.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::StatsError;

/// Upper bound on the ingestion queue to keep a typo from reserving gigabytes.
pub const MAX_QUEUE_CAPACITY: usize = 10_000_000;

/// Upper bound on `top_k` and `top_value_buckets`; every offer of a new key
/// scans the whole candidate set.
pub const MAX_TOP_K: usize = 1_024;

/// Upper bound on Count-Min table cells.
pub const MAX_CMS_CELLS: usize = 1 << 28;

/// Upper bound on any interval option (one year).
pub const MAX_INTERVAL_SECONDS: f64 = 31_536_000.0;

/// Configuration for one stream's aggregator and pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// HyperLogLog index bits `k`; the estimator keeps `2^k` registers.
    pub hll_register_bits: u8,
    /// Count-Min counters per row.
    pub cms_width: usize,
    /// Count-Min rows.
    pub cms_depth: usize,
    /// Bounded ingestion queue length.
    pub queue_capacity: usize,
    /// Seconds between snapshots delivered to the reporter.
    pub snapshot_interval_seconds: f64,
    /// Top-level size of the quantile sketch.
    pub quantile_summary_capacity: usize,
    /// Number of candidate heavy hitters tracked and reported.
    pub top_k: usize,
    /// Number of most common rounded values tracked and reported.
    pub top_value_buckets: usize,
    /// Entities whose estimated frequency is always reported.
    pub watched_entities: Vec<String>,
    /// Most events the consumer applies per aggregator critical section.
    pub max_batch_size: usize,
    /// Seconds between queue-depth log lines; disabled when unset.
    pub queue_report_interval_seconds: Option<f64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            hll_register_bits: 10,
            cms_width: 1_000,
            cms_depth: 5,
            queue_capacity: 10,
            snapshot_interval_seconds: 1.0,
            quantile_summary_capacity: 200,
            top_k: 10,
            top_value_buckets: 3,
            watched_entities: Vec::new(),
            max_batch_size: 100,
            queue_report_interval_seconds: None,
        }
    }
}

impl StreamConfig {
    /// Parses and validates a TOML document. Missing keys take defaults.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidConfig`] on parse or validation failure.
    pub fn from_toml_str(source: &str) -> Result<Self, StatsError> {
        let config: Self =
            toml::from_str(source).map_err(|err| StatsError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every option against its bounds.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidConfig`] naming the first bad option.
    pub fn validate(&self) -> Result<(), StatsError> {
        if !(4..=18).contains(&self.hll_register_bits) {
            return Err(StatsError::InvalidConfig(format!(
                "hll_register_bits {} must be in [4, 18]",
                self.hll_register_bits
            )));
        }
        if self.cms_width == 0 || self.cms_depth == 0 {
            return Err(StatsError::InvalidConfig(
                "cms_width and cms_depth must be > 0".to_string(),
            ));
        }
        if self.cms_width.saturating_mul(self.cms_depth) > MAX_CMS_CELLS {
            return Err(StatsError::InvalidConfig(format!(
                "cms_width * cms_depth exceeds maximum allowed {MAX_CMS_CELLS}"
            )));
        }
        if self.queue_capacity == 0 {
            return Err(StatsError::InvalidConfig("queue_capacity must be > 0".to_string()));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(StatsError::InvalidConfig(format!(
                "queue_capacity {} exceeds maximum allowed {MAX_QUEUE_CAPACITY}",
                self.queue_capacity
            )));
        }
        Self::check_interval("snapshot_interval_seconds", self.snapshot_interval_seconds)?;
        if let Some(interval) = self.queue_report_interval_seconds {
            Self::check_interval("queue_report_interval_seconds", interval)?;
        }
        if self.quantile_summary_capacity < 8 {
            return Err(StatsError::InvalidConfig(
                "quantile_summary_capacity must be >= 8".to_string(),
            ));
        }
        Self::check_candidates("top_k", self.top_k)?;
        Self::check_candidates("top_value_buckets", self.top_value_buckets)?;
        if self.max_batch_size == 0 {
            return Err(StatsError::InvalidConfig("max_batch_size must be > 0".to_string()));
        }
        Ok(())
    }

    /// Returns the snapshot period as a [`Duration`].
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs_f64(self.snapshot_interval_seconds)
    }

    /// Returns the queue-depth log period, if enabled.
    pub fn queue_report_interval(&self) -> Option<Duration> {
        self.queue_report_interval_seconds.map(Duration::from_secs_f64)
    }

    fn check_candidates(name: &str, size: usize) -> Result<(), StatsError> {
        if size == 0 || size > MAX_TOP_K {
            return Err(StatsError::InvalidConfig(format!(
                "{name} {size} must be in [1, {MAX_TOP_K}]"
            )));
        }
        Ok(())
    }

    fn check_interval(name: &str, seconds: f64) -> Result<(), StatsError> {
        if !seconds.is_finite() || seconds <= 0.0 || seconds > MAX_INTERVAL_SECONDS {
            return Err(StatsError::InvalidConfig(format!(
                "{name} must be in (0, {MAX_INTERVAL_SECONDS}], got {seconds}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_TOP_K, StreamConfig};
    use crate::StatsError;

    #[test]
    fn defaults_are_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.snapshot_interval().as_millis(), 1_000);
        assert!(config.queue_report_interval().is_none());
        assert_eq!(config.top_value_buckets, 3);

        let widest = StreamConfig { top_k: MAX_TOP_K, ..Default::default() };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            StreamConfig { hll_register_bits: 3, ..Default::default() },
            StreamConfig { cms_width: 0, ..Default::default() },
            StreamConfig { queue_capacity: 0, ..Default::default() },
            StreamConfig { snapshot_interval_seconds: 0.0, ..Default::default() },
            StreamConfig { snapshot_interval_seconds: f64::NAN, ..Default::default() },
            StreamConfig { queue_report_interval_seconds: Some(-1.0), ..Default::default() },
            StreamConfig { quantile_summary_capacity: 4, ..Default::default() },
            StreamConfig { top_k: 0, ..Default::default() },
            StreamConfig { top_k: MAX_TOP_K + 1, ..Default::default() },
            StreamConfig { top_value_buckets: 0, ..Default::default() },
            StreamConfig { top_value_buckets: usize::MAX, ..Default::default() },
            StreamConfig { max_batch_size: 0, ..Default::default() },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(StatsError::InvalidConfig(_))),
                "{config:?}"
            );
        }
    }

    #[test]
    fn toml_overrides_merge_with_defaults() {
        let config = StreamConfig::from_toml_str(
            r#"
            hll_register_bits = 14
            queue_capacity = 512
            watched_entities = ["123", "admin"]
            queue_report_interval_seconds = 5.0
            "#,
        )
        .unwrap();

        assert_eq!(config.hll_register_bits, 14);
        assert_eq!(config.queue_capacity, 512);
        assert_eq!(config.cms_width, 1_000);
        assert_eq!(config.watched_entities, vec!["123", "admin"]);
        assert_eq!(config.queue_report_interval().unwrap().as_secs(), 5);
    }

    #[test]
    fn invalid_toml_is_reported() {
        assert!(StreamConfig::from_toml_str("queue_capacity = \"lots\"").is_err());
        assert!(StreamConfig::from_toml_str("queue_capacity = 0").is_err());
    }
}
