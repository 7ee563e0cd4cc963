//! Backoff command implementation.

use super::OutputFormat;
use pollfeed_engine::{Backoff, BackoffConfig};
use serde::Serialize;
use std::time::Duration;

/// One row of the delay schedule.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Consecutive failure number, starting at 1.
    pub failure: u32,
    /// Delay before the next attempt in milliseconds.
    pub delay_ms: u64,
    /// Time since the first attempt when the next attempt starts.
    pub elapsed_ms: u64,
    /// Whether the delay has reached its cap.
    pub capped: bool,
}

/// Computes the delay schedule for `attempts` consecutive failures.
pub fn schedule(config: BackoffConfig, attempts: u32) -> Vec<ScheduleEntry> {
    let max_delay = config.max_delay;
    let mut backoff = Backoff::new(config);
    let mut elapsed = Duration::ZERO;

    (1..=attempts)
        .map(|failure| {
            let delay = backoff.next_delay();
            elapsed += delay;
            ScheduleEntry {
                failure,
                delay_ms: delay.as_millis() as u64,
                elapsed_ms: elapsed.as_millis() as u64,
                capped: delay == max_delay,
            }
        })
        .collect()
}

/// Runs the backoff command.
pub fn run(
    min_ms: u64,
    max_ms: u64,
    attempts: u32,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = BackoffConfig::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms));
    let entries = schedule(config, attempts);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => {
            println!("Reconnect schedule (min {min_ms}ms, max {max_ms}ms)");
            println!("{:>8}  {:>10}  {:>12}", "failure", "delay_ms", "elapsed_ms");
            for entry in &entries {
                let cap = if entry.capped { "  (cap)" } else { "" };
                println!(
                    "{:>8}  {:>10}  {:>12}{cap}",
                    entry.failure, entry.delay_ms, entry.elapsed_ms
                );
            }
        }
    }

    Ok(())
}
