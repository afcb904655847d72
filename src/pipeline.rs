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
//! Bounded ingestion queue feeding one aggregator.
//!
//! Lifecycle: `Idle -> Running -> Draining -> Stopped`.
//!
//! - Producers push into a bounded queue and suspend while it is full.
//!   Nothing is dropped by the pipeline itself.
//! - A single consumer task pulls events in arrival order and applies them
//!   to the aggregator, up to `max_batch_size` per critical section.
//! - A snapshot task takes a snapshot every `snapshot_interval` and awaits the
//!   reporter before the next tick, so deliveries never overlap and their
//!   timestamps never go backwards.
//! - `stop` moves to `Draining`: spawned producers are cancelled at their
//!   next suspension point, the queue stops admitting events, every admitted
//!   event is still applied, the snapshot task is halted and a final
//!   snapshot is delivered before `Stopped`.
//!
//! The aggregator sits behind a mutex that only the consumer locks for
//! writing. Guards are never held across an `.await`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::aggregator::StatisticsAggregator;
use crate::config::StreamConfig;
use crate::event::{AggregateSnapshot, Event};
use crate::reporter::Reporter;
use crate::StatsError;

/// Stage of an [`EventPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Built, queue accepts events, nothing consumes them yet.
    Idle,
    /// Consumer and snapshot tasks are live.
    Running,
    /// Ingestion closed, admitted events still being applied.
    Draining,
    /// All tasks finished.
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters describing pipeline activity.
#[derive(Debug, Default)]
pub struct PipelineStats {
    events_received: AtomicU64,
    events_applied: AtomicU64,
    events_rejected: AtomicU64,
    snapshots_emitted: AtomicU64,
    reporter_failures: AtomicU64,
    producer_failures: AtomicU64,
}

impl PipelineStats {
    /// Events admitted into the queue.
    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    /// Events folded into the aggregator.
    pub fn events_applied(&self) -> u64 {
        self.events_applied.load(Ordering::Relaxed)
    }

    /// Events the aggregator refused (non-finite fields).
    pub fn events_rejected(&self) -> u64 {
        self.events_rejected.load(Ordering::Relaxed)
    }

    /// Snapshots accepted by the reporter.
    pub fn snapshots_emitted(&self) -> u64 {
        self.snapshots_emitted.load(Ordering::Relaxed)
    }

    /// Snapshots the reporter refused.
    pub fn reporter_failures(&self) -> u64 {
        self.reporter_failures.load(Ordering::Relaxed)
    }

    /// Spawned producers that returned an error or panicked.
    pub fn producer_failures(&self) -> u64 {
        self.producer_failures.load(Ordering::Relaxed)
    }
}

/// Cloneable handle for pushing events into a pipeline's queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    inner: mpsc::Sender<Event>,
    stats: Arc<PipelineStats>,
}

impl EventSender {
    /// Enqueues `event`, suspending while the queue is full.
    ///
    /// # Errors
    /// Returns [`StatsError::PipelineClosed`] once the pipeline is draining.
    pub async fn send(&self, event: Event) -> Result<(), StatsError> {
        self.inner
            .send(event)
            .await
            .map_err(|_| StatsError::PipelineClosed)?;
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Enqueues `event` without waiting. Lets a producer decide to drop.
    ///
    /// # Errors
    /// Returns [`StatsError::QueueFull`] when at capacity and
    /// [`StatsError::PipelineClosed`] once the pipeline is draining.
    pub fn try_send(&self, event: Event) -> Result<(), StatsError> {
        self.inner.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => StatsError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => StatsError::PipelineClosed,
        })?;
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of events waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    /// Maximum number of queued events.
    pub fn queue_capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// Returns `true` once the queue no longer admits events.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Drives one [`StatisticsAggregator`] from a bounded event queue.
///
/// Tasks are spawned on the ambient tokio runtime; `start`, `spawn_producer`
/// and `stop` must be called from within one.
///
/// # Example
/// ```rust
/// use streamstats::{Event, EventPipeline, LogReporter, StreamConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), streamstats::StatsError> {
/// let mut pipeline = EventPipeline::new(StreamConfig::default(), LogReporter::new("demo"))?;
/// let sender = pipeline.sender()?;
/// pipeline.start()?;
///
/// for i in 0..100 {
///     sender.send(Event::new(format!("user-{}", i % 10), 1.0, 0.0, 0.005)).await?;
/// }
///
/// let last = pipeline.stop().await?;
/// assert_eq!(last.events_processed, 100);
/// # Ok(())
/// # }
/// ```
pub struct EventPipeline {
    config: StreamConfig,
    aggregator: Arc<Mutex<StatisticsAggregator>>,
    reporter: Arc<dyn Reporter>,
    stats: Arc<PipelineStats>,
    state: watch::Sender<PipelineState>,
    sender: EventSender,
    receiver: Option<mpsc::Receiver<Event>>,
    consumer: Option<JoinHandle<()>>,
    snapshotter: Option<(oneshot::Sender<()>, JoinHandle<f64>)>,
    monitor: Option<JoinHandle<()>>,
    producers: JoinSet<()>,
    next_producer_id: u64,
}

impl EventPipeline {
    /// Builds an idle pipeline and its aggregator from `config`.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: StreamConfig, reporter: impl Reporter + 'static) -> Result<Self, StatsError> {
        let aggregator = StatisticsAggregator::new(&config)?;
        let stats = Arc::new(PipelineStats::default());
        let (inner, receiver) = mpsc::channel(config.queue_capacity);
        let (state, _) = watch::channel(PipelineState::Idle);

        Ok(Self {
            config,
            aggregator: Arc::new(Mutex::new(aggregator)),
            reporter: Arc::new(reporter),
            sender: EventSender {
                inner,
                stats: Arc::clone(&stats),
            },
            stats,
            state,
            receiver: Some(receiver),
            consumer: None,
            snapshotter: None,
            monitor: None,
            producers: JoinSet::new(),
            next_producer_id: 0,
        })
    }

    /// Returns the current lifecycle stage.
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Returns the activity counters.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Returns the configuration the pipeline was built from.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Returns a handle for enqueuing events.
    ///
    /// Events sent while `Idle` wait in the queue until `start`.
    ///
    /// # Errors
    /// Returns [`StatsError::PipelineClosed`] once draining has begun.
    pub fn sender(&self) -> Result<EventSender, StatsError> {
        match self.state() {
            PipelineState::Idle | PipelineState::Running => Ok(self.sender.clone()),
            PipelineState::Draining | PipelineState::Stopped => Err(StatsError::PipelineClosed),
        }
    }

    /// Snapshot of everything applied so far.
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.aggregator.lock().snapshot()
    }

    /// Copy of the current aggregator, e.g. for merging streams.
    pub fn aggregator(&self) -> StatisticsAggregator {
        self.aggregator.lock().clone()
    }

    /// Spawns the consumer, snapshot and optional queue-monitor tasks.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidState`] unless the pipeline is `Idle`.
    pub fn start(&mut self) -> Result<(), StatsError> {
        let receiver = match (self.state(), self.receiver.take()) {
            (PipelineState::Idle, Some(receiver)) => receiver,
            (actual, receiver) => {
                self.receiver = receiver;
                return Err(StatsError::InvalidState { actual, expected: "idle" });
            }
        };

        self.state.send_replace(PipelineState::Running);

        self.consumer = Some(tokio::spawn(consume(
            receiver,
            Arc::clone(&self.aggregator),
            Arc::clone(&self.stats),
            self.state.subscribe(),
            self.config.max_batch_size,
        )));

        let (halt, halted) = oneshot::channel();
        let snapshots = tokio::spawn(run_snapshots(
            Arc::clone(&self.aggregator),
            Arc::clone(&self.reporter),
            Arc::clone(&self.stats),
            self.config.snapshot_interval(),
            halted,
        ));
        self.snapshotter = Some((halt, snapshots));

        if let Some(interval) = self.config.queue_report_interval() {
            self.monitor = Some(tokio::spawn(monitor_queue(self.sender.clone(), interval)));
        }

        info!(
            queue_capacity = self.config.queue_capacity,
            snapshot_interval = ?self.config.snapshot_interval(),
            "pipeline running"
        );
        Ok(())
    }

    /// Runs `producer` as its own task with a sender for this pipeline.
    ///
    /// An error or panic from the producer is logged and counted; it does not
    /// affect the consumer or other producers. The producer is cancelled at
    /// its next suspension point once the pipeline starts draining.
    ///
    /// # Errors
    /// Returns [`StatsError::PipelineClosed`] once draining has begun.
    pub fn spawn_producer<F, Fut, E>(&mut self, producer: F) -> Result<u64, StatsError>
    where
        F: FnOnce(EventSender) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let sender = self.sender()?;
        let id = self.next_producer_id;
        self.next_producer_id += 1;

        let stats = Arc::clone(&self.stats);
        let mut state = self.state.subscribe();
        // Aborting or dropping the wrapper takes the producer down with it.
        let mut task = AbortOnDrop(tokio::spawn(producer(sender)));

        self.producers.spawn(async move {
            tokio::select! {
                biased;
                () = wait_for_drain(&mut state) => {
                    task.0.abort();
                    debug!(producer = id, "producer cancelled for drain");
                }
                joined = &mut task.0 => match joined {
                    Ok(Ok(())) => debug!(producer = id, "producer finished"),
                    Ok(Err(err)) => {
                        stats.producer_failures.fetch_add(1, Ordering::Relaxed);
                        error!(producer = id, error = %err, "producer failed");
                    }
                    Err(err) => {
                        stats.producer_failures.fetch_add(1, Ordering::Relaxed);
                        error!(producer = id, error = %err, "producer task aborted");
                    }
                },
            }
        });
        Ok(id)
    }

    /// Drains the queue, halts the tasks and returns the final snapshot,
    /// which is also delivered to the reporter.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidState`] unless the pipeline is `Running`.
    pub async fn stop(&mut self) -> Result<AggregateSnapshot, StatsError> {
        let actual = self.state();
        if actual != PipelineState::Running {
            return Err(StatsError::InvalidState { actual, expected: "running" });
        }

        self.state.send_replace(PipelineState::Draining);
        info!(queued = self.sender.queue_len(), "pipeline draining");

        while self.producers.join_next().await.is_some() {}

        if let Some(consumer) = self.consumer.take() {
            if let Err(err) = consumer.await {
                error!(error = %err, "consumer task ended abnormally");
            }
        }

        let mut last_timestamp = 0.0;
        if let Some((halt, snapshots)) = self.snapshotter.take() {
            let _ = halt.send(());
            match snapshots.await {
                Ok(timestamp) => last_timestamp = timestamp,
                Err(err) => error!(error = %err, "snapshot task ended abnormally"),
            }
        }

        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }

        let snapshot = deliver(&self.aggregator, self.reporter.as_ref(), &self.stats, last_timestamp).await;

        self.state.send_replace(PipelineState::Stopped);
        info!(
            applied = self.stats.events_applied(),
            rejected = self.stats.events_rejected(),
            snapshots = self.stats.snapshots_emitted(),
            "pipeline stopped"
        );
        Ok(snapshot)
    }
}

impl Drop for EventPipeline {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
        }
        if let Some((_, snapshots)) = self.snapshotter.take() {
            snapshots.abort();
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn wait_for_drain(state: &mut watch::Receiver<PipelineState>) {
    loop {
        if matches!(*state.borrow_and_update(), PipelineState::Draining | PipelineState::Stopped) {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

async fn consume(
    mut receiver: mpsc::Receiver<Event>,
    aggregator: Arc<Mutex<StatisticsAggregator>>,
    stats: Arc<PipelineStats>,
    mut state: watch::Receiver<PipelineState>,
    max_batch_size: usize,
) {
    let mut batch = Vec::with_capacity(max_batch_size);

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(event) => {
                    fill_batch(event, &mut receiver, &mut batch, max_batch_size);
                    apply_batch(&aggregator, &stats, &mut batch);
                }
                None => break,
            },
            () = wait_for_drain(&mut state) => break,
        }
    }

    // No new admissions; everything already queued is still applied.
    receiver.close();
    while let Some(event) = receiver.recv().await {
        fill_batch(event, &mut receiver, &mut batch, max_batch_size);
        apply_batch(&aggregator, &stats, &mut batch);
    }
    debug!(applied = stats.events_applied(), "consumer drained");
}

fn fill_batch(
    first: Event,
    receiver: &mut mpsc::Receiver<Event>,
    batch: &mut Vec<Event>,
    max_batch_size: usize,
) {
    batch.push(first);
    while batch.len() < max_batch_size {
        match receiver.try_recv() {
            Ok(event) => batch.push(event),
            Err(_) => break,
        }
    }
}

fn apply_batch(
    aggregator: &Mutex<StatisticsAggregator>,
    stats: &PipelineStats,
    batch: &mut Vec<Event>,
) {
    let size = batch.len();
    let mut aggregator = aggregator.lock();
    for event in batch.drain(..) {
        match aggregator.update(&event) {
            Ok(()) => {
                stats.events_applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                stats.events_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(entity = %event.entity_id, error = %err, "event rejected");
            }
        }
    }
    debug!(batch = size, total = aggregator.events_processed(), "applied batch");
}

async fn run_snapshots(
    aggregator: Arc<Mutex<StatisticsAggregator>>,
    reporter: Arc<dyn Reporter>,
    stats: Arc<PipelineStats>,
    period: Duration,
    mut halt: oneshot::Receiver<()>,
) -> f64 {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut last_timestamp = 0.0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                last_timestamp = deliver(&aggregator, reporter.as_ref(), &stats, last_timestamp)
                    .await
                    .timestamp;
            }
            _ = &mut halt => break,
        }
    }
    last_timestamp
}

/// Takes one snapshot, clamps its timestamp to `not_before` and hands it to
/// the reporter.
async fn deliver(
    aggregator: &Mutex<StatisticsAggregator>,
    reporter: &dyn Reporter,
    stats: &PipelineStats,
    not_before: f64,
) -> AggregateSnapshot {
    let mut snapshot = {
        let aggregator = aggregator.lock();
        aggregator.snapshot()
    };
    snapshot.timestamp = snapshot.timestamp.max(not_before);

    match reporter.report(&snapshot).await {
        Ok(()) => {
            stats.snapshots_emitted.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            stats.reporter_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %err, "snapshot delivery failed");
        }
    }
    snapshot
}

async fn monitor_queue(sender: EventSender, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        info!(
            depth = sender.queue_len(),
            capacity = sender.queue_capacity(),
            "ingestion queue depth"
        );
    }
}
