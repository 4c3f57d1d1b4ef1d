//! phaseflow demo - Collatz stopping times
//!
//! Computes the stopping time of `1..=N` in a parallel section, reverses the
//! stream and prints the longest one.
//!
//! Usage: `phaseflow [N] [config.toml]`

use anyhow::Context;
use phaseflow::{
    config::{default_config_path, EngineConfig},
    logging,
    pipeline::{
        nodes::{collect, generate, map, reverse, Collected},
        parallel, ParallelOptions, VirtualChunk,
    },
};

/// Steps until `n` reaches 1.
fn stopping_time(mut n: u64) -> u32 {
    let mut steps = 0;
    while n != 1 {
        n = if n % 2 == 0 { n / 2 } else { 3 * n + 1 };
        steps += 1;
    }
    steps
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let count: u64 = match args.next() {
        Some(n) => n.parse().context("N must be a positive integer")?,
        None => 100_000,
    };

    let config = match args.next().map(std::path::PathBuf::from).or_else(default_config_path) {
        Some(path) => EngineConfig::load_or_default(path),
        None => EngineConfig::default(),
    };
    let _guard = logging::init(&config.logging)?;

    tracing::info!("Computing stopping times for 1..={}", count);

    let results = Collected::new();
    let options = ParallelOptions::from_settings(&config.parallel);
    let mut pipeline = (generate(count, |i| i + 1).name("numbers")
        | parallel(
            || VirtualChunk::new(map(|n: u64| (n, stopping_time(n)))),
            options,
        )
        | reverse()
        | collect(&results))
    .build()
    .context("Failed to build pipeline")?;

    let summary = pipeline
        .run_with_config(&config)
        .context("Pipeline run failed")?;

    let results = results.take();
    let longest = results.iter().max_by_key(|(n, steps)| (*steps, std::cmp::Reverse(*n)));
    match longest {
        Some((n, steps)) => println!("{} takes {} steps (of {} numbers)", n, steps, results.len()),
        None => println!("No numbers"),
    }
    tracing::info!(
        "{} phases, {} steps in {:?}",
        summary.phases.len(),
        summary.steps_done(),
        summary.elapsed
    );
    Ok(())
}
