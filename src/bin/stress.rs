// src/bin/stress.rs
// Stress test companion: eats CPU and RAM to trigger the agent's
// threshold-based recording, then verifies via the metrics endpoint.
// Run against a live agent: cargo run --bin stress

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "stress")]
#[command(about = "Drives host CPU and memory past the recording threshold", long_about = None)]
struct Args {
    /// Metrics endpoint of the running agent
    #[arg(long, default_value = "http://127.0.0.1:9102/metrics")]
    metrics_url: String,

    /// How long to hold the load
    #[arg(long, default_value_t = 30)]
    hold_secs: u64,

    /// Fraction of total RAM to allocate on top of current usage
    #[arg(long, default_value_t = 0.30)]
    mem_fraction: f64,

    /// Skip the metrics verification step
    #[arg(long)]
    no_verify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    println!("=== log-sentry stress test ===");
    println!("CPUs: {cpus}, pushing CPU and memory past the recording threshold\n");

    // Phase 1: CPU saturation, one spinner per core.
    println!("[1/3] Saturating CPU...");
    let stop = Arc::new(AtomicBool::new(false));
    let spinners: Vec<_> = (0..cpus)
        .map(|_| {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut x = 1.0f64;
                while !stop.load(Ordering::Relaxed) {
                    x = x.sin() + x.cos();
                }
                x
            })
        })
        .collect();

    // Phase 2: memory allocation, touching every page so the RSS is real.
    println!("[2/3] Allocating memory...");
    let total = total_mem_bytes();
    let target = (total as f64 * args.mem_fraction) as usize;
    let block_size = 100 * 1024 * 1024;
    let mut blocks: Vec<Vec<u8>> = Vec::new();
    let mut allocated = 0usize;
    while allocated < target {
        let mut block = vec![0u8; block_size];
        for i in (0..block.len()).step_by(4096) {
            block[i] = 0xFF;
        }
        blocks.push(block);
        allocated += block_size;
        println!(
            "  allocated: {} MB / {} MB target",
            allocated / 1024 / 1024,
            target / 1024 / 1024
        );
    }

    println!("[3/3] Holding for {}s... (threshold should trigger)", args.hold_secs);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.hold_secs)) => {}
        _ = tokio::signal::ctrl_c() => println!("\n  interrupted"),
    }

    println!("\nReleasing resources...");
    stop.store(true, Ordering::Relaxed);
    for spinner in spinners {
        let _ = spinner.join();
    }
    drop(blocks);

    if args.no_verify {
        return Ok(());
    }

    println!("Waiting 15s for hysteresis to close the event...");
    tokio::time::sleep(Duration::from_secs(15)).await;

    println!("\n=== Verifying via {} ===", args.metrics_url);
    let body = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?
        .get(&args.metrics_url)
        .send()
        .await
        .context("failed to query metrics endpoint")?
        .text()
        .await?;

    let events = scrape_counter(&body, "crash_events_total").unwrap_or(0.0);
    let snapshots = scrape_counter(&body, "resource_snapshots_total").unwrap_or(0.0);

    if events < 1.0 {
        bail!("no crash events recorded; threshold may not have been reached");
    }
    println!("crash events recorded: {events}");
    println!("critical snapshots taken: {snapshots}");
    Ok(())
}

fn total_mem_bytes() -> u64 {
    let fallback = 16 * 1024 * 1024 * 1024;
    let Ok(data) = std::fs::read_to_string("/proc/meminfo") else {
        return fallback;
    };
    for line in data.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) {
                return kb * 1024;
            }
        }
    }
    fallback
}

/// Pulls a single un-labelled counter value out of the text exposition.
fn scrape_counter(body: &str, name: &str) -> Option<f64> {
    body.lines()
        .find(|l| l.starts_with(name) && !l.starts_with('#'))
        .and_then(|l| l.split_whitespace().last())
        .and_then(|v| v.parse().ok())
}
