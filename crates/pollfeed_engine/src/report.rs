//! Rate-limited error reporting.
//!
//! The first occurrence of each distinct error message is surfaced at once.
//! Repeats within a batch window are only counted, and at the end of the
//! window one digest line per message is written with its count. A window
//! that closes with nothing recorded returns the source to immediate mode.

use crate::config::AggregatorConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One line of error output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportLine {
    /// An error surfaced as it happened.
    Surfaced {
        /// Error source.
        source: String,
        /// Error message.
        message: String,
    },
    /// End-of-window summary for one message.
    Digest {
        /// Error source.
        source: String,
        /// Start of the window being summarised.
        since: DateTime<Utc>,
        /// Error message.
        message: String,
        /// Occurrences since `since`.
        count: u64,
    },
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportLine::Surfaced { source, message } => write!(f, "[{source}] {message}"),
            ReportLine::Digest {
                source,
                since,
                message,
                count,
            } => write!(
                f,
                "Errors for \"{source}\" since {}: {message} (x{count})",
                since.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        }
    }
}

/// Destination for report lines.
pub trait ReportSink: Send + Sync {
    /// Writes one line.
    fn emit(&self, line: ReportLine);
}

/// Writes report lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, line: ReportLine) {
        match &line {
            ReportLine::Surfaced { .. } => warn!("{line}"),
            ReportLine::Digest { .. } => info!("{line}"),
        }
    }
}

#[derive(Default)]
struct ErrorBatch {
    /// Start of the active window; `None` when no window is open.
    started: Option<DateTime<Utc>>,
    /// Messages surfaced since the streak of windows began.
    surfaced: Vec<String>,
    /// Occurrences per message since `started`.
    counts: HashMap<String, u64>,
    /// Bumped whenever a window opens or closes.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    config: AggregatorConfig,
    sink: Arc<dyn ReportSink>,
    batches: Mutex<HashMap<String, ErrorBatch>>,
}

/// Batches repeated errors per named source.
///
/// Cheap to clone; clones share state. Flush timers run on the tokio runtime
/// current at the time a window opens. Without a runtime a window stays open
/// until [`ErrorAggregator::flush`] is called.
#[derive(Clone)]
pub struct ErrorAggregator {
    inner: Arc<Inner>,
}

impl ErrorAggregator {
    /// Creates an aggregator that writes through `tracing`.
    pub fn new(config: AggregatorConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Creates an aggregator with a custom sink.
    pub fn with_sink(config: AggregatorConfig, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                batches: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AggregatorConfig {
        &self.inner.config
    }

    /// Records an error for `source`, surfacing it if it is new.
    pub fn handle_error(&self, error: impl fmt::Display, source: &str) {
        let message = error.to_string();
        let mut surface = false;

        {
            let mut batches = self.inner.batches.lock();
            let batch = batches.entry(source.to_string()).or_default();

            if batch.started.is_none() {
                batch.started = Some(Utc::now());
                batch.generation += 1;
                batch.timer = self.schedule_flush(source, batch.generation);
                surface = true;
            }
            if !batch.surfaced.contains(&message) {
                batch.surfaced.push(message.clone());
                surface = true;
            }
            *batch.counts.entry(message.clone()).or_insert(0) += 1;
        }

        if surface {
            self.inner.sink.emit(ReportLine::Surfaced {
                source: source.to_string(),
                message,
            });
        }
    }

    /// Ends the current window of `source`.
    ///
    /// Normally invoked by the window timer. Calling it directly cancels the
    /// pending timer.
    pub fn flush(&self, source: &str) {
        self.flush_window(source, None);
    }

    /// Returns true if `source` has an open batch window.
    pub fn is_window_open(&self, source: &str) -> bool {
        self.inner
            .batches
            .lock()
            .get(source)
            .is_some_and(|batch| batch.started.is_some())
    }

    /// Returns the counts recorded for `source` in the current window,
    /// sorted by message.
    pub fn pending(&self, source: &str) -> Vec<(String, u64)> {
        let batches = self.inner.batches.lock();
        let mut counts: Vec<(String, u64)> = batches
            .get(source)
            .map(|batch| {
                batch
                    .counts
                    .iter()
                    .map(|(message, count)| (message.clone(), *count))
                    .collect()
            })
            .unwrap_or_default();
        counts.sort();
        counts
    }

    /// Cancels every pending flush timer. Recorded counts are discarded.
    pub fn shutdown(&self) {
        let mut batches = self.inner.batches.lock();
        for (_, batch) in batches.drain() {
            if let Some(timer) = batch.timer {
                timer.abort();
            }
        }
    }

    fn schedule_flush(&self, source: &str, generation: u64) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let source = source.to_string();
        let window = self.inner.config.window;

        Some(runtime.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = weak.upgrade() {
                ErrorAggregator { inner }.flush_window(&source, Some(generation));
            }
        }))
    }

    fn flush_window(&self, source: &str, generation: Option<u64>) {
        let mut lines = Vec::new();

        {
            let mut batches = self.inner.batches.lock();
            let Some(batch) = batches.get_mut(source) else {
                return;
            };
            let Some(since) = batch.started else {
                return;
            };

            match generation {
                // Timer of a window that has since been replaced.
                Some(expected) if expected != batch.generation => return,
                Some(_) => {
                    batch.timer.take();
                }
                None => {
                    if let Some(timer) = batch.timer.take() {
                        timer.abort();
                    }
                }
            }

            if batch.counts.is_empty() {
                batch.started = None;
                batch.surfaced.clear();
                batch.generation += 1;
            } else {
                for message in &batch.surfaced {
                    if let Some(count) = batch.counts.get(message) {
                        lines.push(ReportLine::Digest {
                            source: source.to_string(),
                            since,
                            message: message.clone(),
                            count: *count,
                        });
                    }
                }
                batch.counts.clear();
                batch.started = Some(Utc::now());
                batch.generation += 1;
                batch.timer = self.schedule_flush(source, batch.generation);
            }
        }

        for line in lines {
            self.inner.sink.emit(line);
        }
    }
}

impl fmt::Debug for ErrorAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorAggregator")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
