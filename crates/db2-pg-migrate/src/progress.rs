//! Progress context shared by the orchestrator, transfer engine and validator.
//!
//! One [`ProgressReporter`] is created per run. Counters are atomic so
//! concurrent table transfers update them without locking. Every event is
//! logged as a structured `tracing` event (JSON when the subscriber is in JSON
//! mode) and, when a channel is attached, forwarded to the caller.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::orchestrator::Phase;

/// Event forwarded to an attached progress channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressUpdate {
    PhaseStarted {
        phase: Phase,
    },
    BatchCommitted {
        table: String,
        batch: u64,
        rows_done: u64,
        rows_total: u64,
        rows_per_second: f64,
    },
    TableCompleted {
        table: String,
        rows: u64,
        rows_per_second: f64,
    },
    TableValidated {
        table: String,
        status: String,
    },
}

/// Run-wide progress context.
#[derive(Debug)]
pub struct ProgressReporter {
    rows_transferred: AtomicU64,
    tables_completed: AtomicU64,
    start: Instant,
    sink: Mutex<Option<mpsc::Sender<ProgressUpdate>>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            rows_transferred: AtomicU64::new(0),
            tables_completed: AtomicU64::new(0),
            start: Instant::now(),
            sink: Mutex::new(None),
        }
    }

    /// Forward every event to `tx`. Events are dropped when the channel is full.
    pub fn with_progress(self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        if let Ok(mut sink) = self.sink.lock() {
            *sink = Some(tx);
        }
        self
    }

    fn send(&self, update: ProgressUpdate) {
        if let Ok(sink) = self.sink.lock() {
            if let Some(tx) = sink.as_ref() {
                let _ = tx.try_send(update);
            }
        }
    }

    pub fn phase_started(&self, phase: Phase) {
        info!(phase = %phase, "Phase started");
        self.send(ProgressUpdate::PhaseStarted { phase });
    }

    /// Record one committed batch of `rows` rows.
    pub fn batch_committed(
        &self,
        table: &str,
        batch: u64,
        rows: u64,
        rows_done: u64,
        rows_total: u64,
        rows_per_second: f64,
    ) {
        self.rows_transferred.fetch_add(rows, Ordering::Relaxed);
        debug!(
            table,
            batch,
            rows_done,
            rows_total,
            rows_per_second = rows_per_second as u64,
            "Batch committed"
        );
        self.send(ProgressUpdate::BatchCommitted {
            table: table.to_string(),
            batch,
            rows_done,
            rows_total,
            rows_per_second,
        });
    }

    pub fn table_completed(&self, table: &str, rows: u64, rows_per_second: f64) {
        self.tables_completed.fetch_add(1, Ordering::Relaxed);
        info!(
            table,
            rows,
            rows_per_second = rows_per_second as u64,
            "Table transfer completed"
        );
        self.send(ProgressUpdate::TableCompleted {
            table: table.to_string(),
            rows,
            rows_per_second,
        });
    }

    pub fn table_validated(&self, table: &str, status: &str) {
        self.send(ProgressUpdate::TableValidated {
            table: table.to_string(),
            status: status.to_string(),
        });
    }

    /// Rows committed in this run (resumed rows are not counted).
    pub fn rows_transferred(&self) -> u64 {
        self.rows_transferred.load(Ordering::Relaxed)
    }

    pub fn tables_completed(&self) -> u64 {
        self.tables_completed.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Average throughput since the reporter was created.
    pub fn rows_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows_transferred() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Log the totals and close the progress channel.
    pub fn finish(&self) {
        info!(
            rows = self.rows_transferred(),
            tables = self.tables_completed(),
            elapsed_secs = self.elapsed().as_secs_f64(),
            "Progress closed"
        );
        if let Ok(mut sink) = self.sink.lock() {
            sink.take();
        }
    }
}
