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
//! Bounded-memory approximate statistics over unbounded event streams.
//!
//! The crate currently exposes:
//! - [`hyperloglog::HyperLogLog`] for approximate distinct-entity counts.
//! - [`count_min::CountMinSketch`] for approximate per-entity frequencies.
//! - [`moments::RollingMoments`] for online mean/variance.
//! - [`quantile::QuantileSketch`] for approximate latency percentiles.
//! - [`heavy_hitters::TopKCandidates`] for bounding the frequent-entity report.
//! - [`aggregator::StatisticsAggregator`] composing the estimators per stream.
//! - [`pipeline::EventPipeline`] feeding an aggregator from a bounded queue and
//!   delivering periodic [`event::AggregateSnapshot`]s to a
//!   [`reporter::Reporter`].
//!
//! Every estimator is an explicitly owned value. Nothing in the crate keeps
//! process-wide state, so independent streams never interfere.

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64_with_seed;

pub mod aggregator;
pub mod config;
pub mod count_min;
pub mod event;
pub mod heavy_hitters;
pub mod hyperloglog;
pub mod moments;
pub mod pipeline;
pub mod quantile;
pub mod reporter;

pub use aggregator::StatisticsAggregator;
pub use config::StreamConfig;
pub use event::{AggregateSnapshot, Event, LatencyPercentiles};
pub use pipeline::{EventPipeline, EventSender, PipelineState, PipelineStats};
pub use reporter::{ChannelReporter, LogReporter, Reporter};

/// Errors returned by estimators, the aggregator and the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    /// A constructor or query received an invalid argument.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// A configuration value is out of range or could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Two estimators with different shapes were combined.
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(&'static str),
    /// The statistic is undefined for the samples seen so far.
    #[error("no data: {0}")]
    NoData(&'static str),
    /// An event carried a field the estimators cannot accept.
    #[error("invalid event: {0}")]
    InvalidEvent(&'static str),
    /// The ingestion queue is at capacity (non-blocking sends only).
    #[error("ingestion queue is full")]
    QueueFull,
    /// The pipeline no longer admits events.
    #[error("pipeline is closed for ingestion")]
    PipelineClosed,
    /// A lifecycle operation was issued in the wrong pipeline stage.
    #[error("pipeline is {actual}, expected {expected}")]
    InvalidState {
        actual: pipeline::PipelineState,
        expected: &'static str,
    },
    /// A reporter failed to accept a snapshot.
    #[error("reporter failed: {0}")]
    Reporter(String),
}

/// Hashes a byte key to a 64-bit value with XXH3 and an explicit seed.
///
/// The function is fixed across processes and platforms, which keeps every
/// estimator reproducible for a given input stream.
pub fn hash64(key: &[u8], seed: u64) -> u64 {
    xxh3_64_with_seed(key, seed)
}

/// SplitMix64 mixer used for deriving independent row seeds and cheap
/// deterministic randomness.
pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::{hash64, splitmix64};

    #[test]
    fn hash_is_stable_for_equal_keys() {
        assert_eq!(hash64(b"user:42", 7), hash64("user:42".as_bytes(), 7));
        assert_ne!(hash64(b"user:42", 7), hash64(b"user:42", 8));
    }

    #[test]
    fn splitmix_spreads_adjacent_inputs() {
        let a = splitmix64(1);
        let b = splitmix64(2);
        assert_ne!(a, b);
        assert!((a ^ b).count_ones() > 16);
    }
}
