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
//! Snapshot sinks.
//!
//! The pipeline awaits each delivery before taking the next snapshot, so a
//! reporter never sees two snapshots at once and always sees them in
//! timestamp order.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::event::AggregateSnapshot;
use crate::StatsError;

/// Receives periodic snapshots from an [`crate::EventPipeline`].
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Handles one snapshot. Errors are logged by the pipeline and do not
    /// stop it.
    async fn report(&self, snapshot: &AggregateSnapshot) -> Result<(), StatsError>;
}

/// Writes each snapshot as a structured `info!` event.
#[derive(Debug, Clone, Default)]
pub struct LogReporter {
    stream: String,
}

impl LogReporter {
    /// Creates a reporter tagging each line with `stream`.
    pub fn new(stream: impl Into<String>) -> Self {
        Self { stream: stream.into() }
    }
}

#[async_trait]
impl Reporter for LogReporter {
    async fn report(&self, snapshot: &AggregateSnapshot) -> Result<(), StatsError> {
        let (p50, p90, p99) = snapshot
            .latency
            .map(|latency| (latency.p50, latency.p90, latency.p99))
            .unwrap_or((f64::NAN, f64::NAN, f64::NAN));

        info!(
            stream = %self.stream,
            timestamp = snapshot.timestamp,
            events = snapshot.events_processed,
            unique = snapshot.unique_count_estimate,
            mean = snapshot.mean.unwrap_or(f64::NAN),
            variance = snapshot.variance.unwrap_or(f64::NAN),
            p50,
            p90,
            p99,
            top = ?snapshot.top_entities,
            value_buckets = ?snapshot.top_value_buckets,
            watched = ?snapshot.watched_entities,
            "stream snapshot"
        );
        Ok(())
    }
}

/// Forwards snapshots into a bounded channel for export or inspection.
///
/// A full channel suspends delivery; a closed channel is reported as an
/// error.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::Sender<AggregateSnapshot>,
}

impl ChannelReporter {
    /// Returns the reporter and the receiving end of its channel.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<AggregateSnapshot>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Reporter for ChannelReporter {
    async fn report(&self, snapshot: &AggregateSnapshot) -> Result<(), StatsError> {
        self.sender
            .send(snapshot.clone())
            .await
            .map_err(|_| StatsError::Reporter("snapshot receiver dropped".to_string()))
    }
}
