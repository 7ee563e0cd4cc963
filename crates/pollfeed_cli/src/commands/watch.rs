//! Watch command implementation.

use super::OutputFormat;
use pollfeed_engine::{
    AggregatorConfig, ClientConfig, ErrorAggregator, PollConfig, ReconciliationEngine,
    ResilientClient, RotatingStore, Subscriber,
};
use pollfeed_protocol::Document;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Options for the watch command.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Collection name to publish under.
    pub collection: String,
    /// Time between polls in milliseconds.
    pub interval_ms: u64,
    /// Probability that a read is lost.
    pub loss_rate: f64,
    /// Error batch window in milliseconds.
    pub window_ms: u64,
    /// Stop after this many settled polls.
    pub polls: Option<u64>,
    /// Simulate read latency.
    pub latency: bool,
    /// Output format.
    pub format: OutputFormat,
}

/// One printed event.
#[derive(Debug, Serialize)]
pub struct EventLine<'a> {
    /// Event kind.
    pub event: &'static str,
    /// Collection the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<&'a str>,
    /// Document id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'a str>,
    /// Document body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

impl EventLine<'_> {
    fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => serde_json::to_string(self).unwrap_or_default(),
            OutputFormat::Text => {
                let mut line = self.event.to_string();
                if let Some(collection) = self.collection {
                    line.push(' ');
                    line.push_str(collection);
                }
                if let Some(id) = self.id {
                    line.push(' ');
                    line.push_str(id);
                }
                line
            }
        }
    }
}

/// Prints each event on its own line.
struct EventPrinter {
    format: OutputFormat,
}

impl EventPrinter {
    fn print(&self, line: EventLine<'_>) {
        println!("{}", line.render(self.format));
    }
}

impl Subscriber for EventPrinter {
    fn added(&self, collection: &str, id: &str, doc: &Document) {
        self.print(EventLine {
            event: "added",
            collection: Some(collection),
            id: Some(id),
            doc: Some(doc.to_json()),
        });
    }

    fn changed(&self, collection: &str, id: &str, doc: &Document) {
        self.print(EventLine {
            event: "changed",
            collection: Some(collection),
            id: Some(id),
            doc: Some(doc.to_json()),
        });
    }

    fn removed(&self, collection: &str, id: &str) {
        self.print(EventLine {
            event: "removed",
            collection: Some(collection),
            id: Some(id),
            doc: None,
        });
    }

    fn ready(&self) {
        self.print(EventLine {
            event: "ready",
            collection: None,
            id: None,
            doc: None,
        });
    }
}

/// Runs the watch command.
pub fn run(options: &WatchOptions) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&options.loss_rate) {
        return Err(format!("Loss rate must be between 0 and 1, got {}", options.loss_rate).into());
    }
    if options.interval_ms == 0 {
        return Err("Interval must be at least 1ms".into());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(watch(options));
    Ok(())
}

async fn watch(options: &WatchOptions) {
    let interval = Duration::from_millis(options.interval_ms);
    let aggregator = ErrorAggregator::new(AggregatorConfig::new(Duration::from_millis(
        options.window_ms,
    )));
    let store = RotatingStore::new()
        .with_loss_rate(options.loss_rate)
        .with_latency(options.latency);
    let client = ResilientClient::start(store, ClientConfig::default(), aggregator.clone());

    let engine = ReconciliationEngine::new(Arc::clone(&client), aggregator.clone());
    let printer = Arc::new(EventPrinter {
        format: options.format,
    });
    let config = PollConfig::new(options.collection.as_str()).with_interval(interval);
    let subscription = engine.subscribe(printer, config);

    let settled = |subscription: &pollfeed_engine::Subscription| {
        let stats = subscription.stats();
        stats.snapshots + stats.failures
    };

    match options.polls {
        Some(polls) => loop {
            if settled(&subscription) >= polls {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                _ = tokio::signal::ctrl_c() => break,
            }
        },
        None => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }

    subscription.stop();
    subscription.join().await;
    client.shutdown().await;
    aggregator.shutdown();

    let stats = subscription.stats();
    info!(
        polls = stats.polls,
        snapshots = stats.snapshots,
        failures = stats.failures,
        added = stats.added,
        changed = stats.changed,
        removed = stats.removed,
        "watch finished"
    );
}
