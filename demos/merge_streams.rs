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
use streamstats::{Event, StatisticsAggregator, StreamConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Two tenants aggregated independently with the same estimator shapes.
    let config = StreamConfig {
        hll_register_bits: 14,
        ..Default::default()
    };
    let mut east = StatisticsAggregator::new(&config)?;
    let mut west = StatisticsAggregator::new(&config)?;

    for i in 0..60_000_u64 {
        let latency = 0.005 + (i % 200) as f64 * 0.0005;
        east.update(&Event::new(format!("user-{}", i % 30_000), (i % 100) as f64, 0.0, latency))?;
        west.update(&Event::new(format!("user-{}", 20_000 + i % 30_000), (i % 50) as f64, 0.0, latency * 2.0))?;
    }

    println!("east unique: {}", east.snapshot().unique_count_estimate);
    println!("west unique: {}", west.snapshot().unique_count_estimate);

    // 50_000 distinct users across both regions.
    east.merge(&west)?;
    let combined = east.snapshot();
    println!("combined unique: {} (exact 50000)", combined.unique_count_estimate);
    println!("combined events: {}", combined.events_processed);
    if let Some(latency) = combined.latency {
        println!("combined p99 latency: {:.4}s", latency.p99);
    }

    // Shapes must agree for a merge.
    let narrow = StatisticsAggregator::new(&StreamConfig { cms_width: 64, ..config })?;
    if let Err(err) = east.merge(&narrow) {
        println!("rejected merge: {err}");
    }

    Ok(())
}
