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
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use streamstats::{Event, EventPipeline, LogReporter, StatsError, StreamConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // A small queue makes the publisher feel backpressure.
    let config = StreamConfig {
        queue_capacity: 10,
        snapshot_interval_seconds: 1.0,
        queue_report_interval_seconds: Some(5.0),
        watched_entities: vec!["123".to_string()],
        ..Default::default()
    };
    let mut pipeline = EventPipeline::new(config, LogReporter::new("users"))?;
    pipeline.start()?;

    // Roughly 100 events per second from 5_000 users.
    pipeline.spawn_producer(|sender| async move {
        loop {
            let (user, value, pause) = {
                let mut rng = rand::thread_rng();
                let value: f64 = (0..12).map(|_| rng.gen_range(0.0..1.0)).sum::<f64>() - 6.0;
                (rng.gen_range(1..=5_000_u32), 50.0 + 10.0 * value, rng.gen_range(0.0..0.02))
            };
            let event = Event::new(user.to_string(), value, unix_now(), pause * 0.5);
            if let Err(err) = sender.send(event).await {
                return Err::<(), StatsError>(err);
            }
            tokio::time::sleep(Duration::from_secs_f64(pause)).await;
        }
    })?;

    tokio::time::sleep(Duration::from_secs(10)).await;
    let last = pipeline.stop().await?;

    println!("events processed:   {}", last.events_processed);
    println!("unique users (est): {}", last.unique_count_estimate);
    println!("user 123 (est):     {}", last.watched_entities.get("123").copied().unwrap_or(0));
    println!("top value buckets:  {:?}", last.top_value_buckets);
    if let (Some(mean), Some(variance)) = (last.mean, last.variance) {
        println!("value mean/var:     {mean:.2} / {variance:.2}");
    }
    if let Some(latency) = last.latency {
        println!(
            "latency (ms):       p50={:.2} p90={:.2} p99={:.2}",
            latency.p50 * 1_000.0,
            latency.p90 * 1_000.0,
            latency.p99 * 1_000.0
        );
    }

    Ok(())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
