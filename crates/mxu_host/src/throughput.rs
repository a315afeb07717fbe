use crate::generator::{random_request, rng_from_seed};
use crate::stats::LatencyStats;
use anyhow::{Result, bail};
use log::warn;
use mxu_core::sim::SimAccelerator;
use mxu_core::{OffloadConfig, OffloadDriver, SerialTransport};
use mxu_io::RequestArtifact;
use rayon::prelude::*;
use std::time::Instant;

/// Agreement required between offloaded and reference products.
const TOLERANCE: f32 = 1e-3;

#[derive(Debug, Default)]
struct WorkerTally {
    latency: LatencyStats,
    verified: usize,
    mismatched: usize,
    failed: usize,
    words_sent: u64,
    words_received: u64,
    clock_units: u64,
}

impl WorkerTally {
    fn merge(self, other: WorkerTally) -> WorkerTally {
        WorkerTally {
            latency: self.latency.merge(other.latency),
            verified: self.verified + other.verified,
            mismatched: self.mismatched + other.mismatched,
            failed: self.failed + other.failed,
            words_sent: self.words_sent + other.words_sent,
            words_received: self.words_received + other.words_received,
            clock_units: self.clock_units + other.clock_units,
        }
    }
}

/// Runs `requests` independent serial offloads in parallel.
///
/// Every request gets its own simulated accelerator, so no link is shared
/// between workers. Each product is checked against the reference
/// multiply; the run fails if any request errors or disagrees.
pub fn run_benchmark(
    requests: usize,
    (m, k, n): (usize, usize, usize),
    seed: Option<u64>,
    config: OffloadConfig,
) -> Result<()> {
    println!("Generating {requests} requests of {m}x{k} * {k}x{n}...");
    let mut rng = rng_from_seed(seed);
    let batch: Vec<RequestArtifact> = (0..requests)
        .map(|_| random_request(&mut rng, m, k, n))
        .collect::<Result<_>>()?;

    println!("Starting Benchmark (Parallel - Rayon)...");
    let driver = OffloadDriver::new(config);
    let start_bench = Instant::now();

    let tally = batch
        .par_iter()
        .fold(WorkerTally::default, |mut tally, request| {
            let mut transport = SerialTransport::new(SimAccelerator::new());
            let started = Instant::now();
            let outcome = driver.multiply(&request.a, &request.b, &mut transport);
            tally.latency.update(started.elapsed().as_nanos() as u64);
            let (sent, received) = transport.word_counts();
            tally.words_sent += sent;
            tally.words_received += received;
            tally.clock_units += transport.link().cycles();

            match outcome {
                Ok(c) => {
                    let agrees = request
                        .a
                        .matmul_reference(&request.b)
                        .is_ok_and(|expected| c.approx_eq(&expected, TOLERANCE));
                    if agrees {
                        tally.verified += 1;
                    } else {
                        tally.mismatched += 1;
                    }
                }
                Err(e) => {
                    warn!("request failed: {e}");
                    tally.failed += 1;
                }
            }
            tally
        })
        .reduce(WorkerTally::default, WorkerTally::merge);

    let seconds = start_bench.elapsed().as_secs_f64();
    println!("Results");
    println!("Time: {seconds:.4} s");
    println!("Throughput: {:.2} requests/s", requests as f64 / seconds);
    println!("Verified: {}/{}", tally.verified, requests);
    println!(
        "Words: {} sent, {} received; {} clock units simulated",
        tally.words_sent, tally.words_received, tally.clock_units
    );
    tally.latency.print_report();

    if tally.failed > 0 || tally.mismatched > 0 {
        bail!(
            "{} requests failed, {} disagreed with the reference",
            tally.failed,
            tally.mismatched
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_benchmark_verifies_every_request() {
        run_benchmark(8, (3, 4, 2), Some(21), OffloadConfig::default()).unwrap();
    }

    #[test]
    fn starved_budget_fails_the_run() {
        let config = OffloadConfig::default().with_flag_budget(1);
        assert!(run_benchmark(2, (2, 2, 2), Some(1), config).is_err());
    }
}
