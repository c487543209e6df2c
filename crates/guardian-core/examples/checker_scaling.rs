//! Drain throughput harness for the simulated accelerator.
//!
//! Runs the synthetic load workload with increasing checker counts and
//! reports serviced events per second of measured region.
//!
//! ## Usage
//!
//! ```sh
//! cargo run -p guardian-core --example checker_scaling
//! ```

#![allow(clippy::pedantic)]

use guardian_core::{Orchestrator, RunConfig, SimAccelerator, SyntheticLoads};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

const EVENTS: u64 = 200_000;
const BUFFER_CAPACITY: usize = 64;
const CHECKER_COUNTS: [u8; 5] = [1, 2, 4, 8, 16];

#[derive(Debug, Clone, Copy)]
struct ScalingResult {
    checkers: u8,
    serviced: u64,
    events_per_second: f64,
    busiest_worker_share: f64,
}

fn measure(checkers: u8) -> Result<ScalingResult, String> {
    let sim = SimAccelerator::with_capacity(BUFFER_CAPACITY);
    let report = Orchestrator::new(&sim, RunConfig::with_checkers(checkers))
        .run(&mut SyntheticLoads::new(&sim, EVENTS))
        .map_err(|error| format!("{checkers} checkers: {error}"))?;

    let serviced = report.total_serviced();
    let busiest = report
        .workers
        .iter()
        .map(|worker| worker.serviced)
        .max()
        .unwrap_or(0);
    let seconds = report.elapsed.as_secs_f64().max(f64::EPSILON);

    Ok(ScalingResult {
        checkers,
        serviced,
        events_per_second: serviced as f64 / seconds,
        busiest_worker_share: busiest as f64 / serviced.max(1) as f64,
    })
}

fn main() {
    println!("Guardian drain scaling ({EVENTS} events, buffer depth {BUFFER_CAPACITY})");
    println!(
        "{:>8}  {:>10}  {:>14}  {:>14}",
        "checkers", "serviced", "events/s", "busiest share"
    );

    for checkers in CHECKER_COUNTS {
        match measure(checkers) {
            Ok(result) => println!(
                "{:>8}  {:>10}  {:>14.0}  {:>13.1}%",
                result.checkers,
                result.serviced,
                result.events_per_second,
                result.busiest_worker_share * 100.0
            ),
            Err(error) => {
                eprintln!("error: {error}");
                std::process::exit(1);
            }
        }
    }
}
