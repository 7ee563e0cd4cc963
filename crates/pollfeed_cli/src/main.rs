//! pollfeed CLI
//!
//! Command-line tools for pollfeed.
//!
//! # Commands
//!
//! - `watch` - Poll the simulated "wild" source and print the event stream
//! - `backoff` - Print the reconnect delay schedule
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// pollfeed command-line tools.
#[derive(Parser)]
#[command(name = "pollfeed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the simulated "wild" source and print events
    Watch {
        /// Collection name to publish under
        #[arg(short, long, default_value = "wild")]
        collection: String,

        /// Time between polls in milliseconds
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,

        /// Probability that a read is lost (0.0 - 1.0)
        #[arg(short, long, default_value = "0.01")]
        loss_rate: f64,

        /// Error batch window in milliseconds
        #[arg(short, long, default_value = "60000")]
        window_ms: u64,

        /// Stop after this many polls (runs until Ctrl-C if omitted)
        #[arg(short, long)]
        polls: Option<u64>,

        /// Answer reads immediately instead of after 100 - 1000ms
        #[arg(long)]
        no_latency: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the reconnect delay schedule
    Backoff {
        /// Delay after the first failure in milliseconds
        #[arg(long, default_value = "100")]
        min_ms: u64,

        /// Maximum delay in milliseconds
        #[arg(long, default_value = "102400")]
        max_ms: u64,

        /// Number of consecutive failures to show
        #[arg(short, long, default_value = "15")]
        attempts: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Watch {
            collection,
            interval_ms,
            loss_rate,
            window_ms,
            polls,
            no_latency,
            format,
        } => {
            let options = commands::watch::WatchOptions {
                collection,
                interval_ms,
                loss_rate,
                window_ms,
                polls,
                latency: !no_latency,
                format: format.parse()?,
            };
            commands::watch::run(&options)?;
        }
        Commands::Backoff {
            min_ms,
            max_ms,
            attempts,
            format,
        } => {
            commands::backoff::run(min_ms, max_ms, attempts, format.parse()?)?;
        }
        Commands::Version => {
            println!("pollfeed CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("pollfeed Engine v{}", pollfeed_engine::VERSION);
        }
    }

    Ok(())
}
