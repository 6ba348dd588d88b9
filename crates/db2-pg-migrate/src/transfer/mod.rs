//! Resumable batched transfer of one table.
//!
//! A reader task pulls batches from the source cursor into a small
//! read-ahead buffer while the writer commits them to the target, one
//! transaction per batch. After every commit the new row offset is written
//! to the checkpoint, so an interrupted transfer resumes at the first
//! uncommitted row and never writes a committed row twice.

pub mod transform;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{Row, SourceDatabase, TargetDatabase};
use crate::error::{MigrateError, Result};
use crate::progress::ProgressReporter;
use crate::schema::TableMapping;
use crate::state::SharedTracker;

pub use transform::{transform_row, transform_value, ColumnKind};

/// Transfer tuning.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Rows per batch (and per target transaction).
    pub batch_size: usize,

    /// Batches read ahead of the writer.
    pub read_ahead: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            read_ahead: 2,
        }
    }
}

/// Outcome of one table transfer.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub table: String,

    /// Rows committed by this call (resumed rows excluded).
    pub rows_transferred: u64,

    /// Source row count at the start of the transfer.
    pub rows_total: u64,

    /// Batches committed by this call.
    pub batches: u64,

    /// The checkpoint already listed the table as complete.
    pub already_complete: bool,

    pub duration: Duration,
    pub rows_per_second: f64,
}

/// Moves table data from source to target in checkpointed batches.
pub struct TransferEngine {
    source: Arc<dyn SourceDatabase>,
    target: Arc<dyn TargetDatabase>,
    tracker: SharedTracker,
    progress: Arc<ProgressReporter>,
    config: TransferConfig,
    cancel: CancellationToken,
}

impl TransferEngine {
    pub fn new(
        source: Arc<dyn SourceDatabase>,
        target: Arc<dyn TargetDatabase>,
        tracker: SharedTracker,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            target,
            tracker,
            progress: Arc::new(ProgressReporter::new()),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Transfer `mapping` starting at `resume_offset` rows.
    ///
    /// Each batch is transformed, written and committed in one target
    /// transaction; the checkpoint is advanced only after the commit. A
    /// failed batch is rolled back, recorded as a failed object and returned
    /// as [`MigrateError::BatchTransfer`]. Cancellation is observed between
    /// batches, never inside one.
    pub async fn transfer_table(
        &self,
        mapping: &TableMapping,
        resume_offset: u64,
    ) -> Result<TransferResult> {
        let table = mapping.qualified_name();
        let start = Instant::now();

        if self.tracker.lock().await.is_completed(&table) {
            debug!("{}: already transferred, skipping", table);
            return Ok(TransferResult {
                table,
                rows_transferred: 0,
                rows_total: 0,
                batches: 0,
                already_complete: true,
                duration: start.elapsed(),
                rows_per_second: 0.0,
            });
        }

        let rows_total = self.source.count_rows(&mapping.source).await?;
        if resume_offset > rows_total {
            return Err(MigrateError::CorruptState(format!(
                "checkpoint offset {} for {} exceeds its {} source rows",
                resume_offset, table, rows_total
            )));
        }

        let batch_size = self.config.batch_size.max(1);
        let kinds: Vec<ColumnKind> = mapping
            .columns
            .iter()
            .map(|c| ColumnKind::from_target_type(&c.target_type))
            .collect();
        let columns = mapping.column_names();

        if resume_offset > 0 {
            info!("{}: resuming at row {} of {}", table, resume_offset, rows_total);
        } else {
            info!("{}: transferring {} rows", table, rows_total);
        }

        let cursor = self
            .source
            .open_cursor(
                &mapping.source,
                mapping.source.order_columns(),
                resume_offset,
                batch_size,
            )
            .await?;
        let mut batches_rx = spawn_reader(cursor, self.config.read_ahead.max(1));

        let mut offset = resume_offset;
        let mut batch_no = resume_offset / batch_size as u64;
        let mut committed_rows = 0u64;
        let mut committed_batches = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                info!("{}: cancelled at row {}", table, offset);
                return Err(MigrateError::Cancelled);
            }

            let rows = match batches_rx.recv().await {
                Some(Ok(rows)) => rows,
                Some(Err(e)) => {
                    let end = offset + batch_size as u64;
                    return Err(self.fail_batch(&table, batch_no, offset, end, e.to_string()).await);
                }
                None => break,
            };

            let n = rows.len() as u64;
            let end = offset + n;
            if let Err(message) = self.write_batch(mapping, &columns, &kinds, rows).await {
                return Err(self.fail_batch(&table, batch_no, offset, end, message).await);
            }

            offset = end;
            batch_no += 1;
            committed_rows += n;
            committed_batches += 1;
            {
                let mut tracker = self.tracker.lock().await;
                tracker.mark_table_in_progress(&table, offset);
                tracker.persist()?;
            }

            let rps = rate(committed_rows, start.elapsed());
            self.progress
                .batch_committed(&table, batch_no, n, offset, rows_total, rps);
        }

        {
            let mut tracker = self.tracker.lock().await;
            tracker.mark_table_completed(&table);
            tracker.persist()?;
        }

        let duration = start.elapsed();
        let rows_per_second = rate(committed_rows, duration);
        self.progress
            .table_completed(&table, committed_rows, rows_per_second);

        Ok(TransferResult {
            table,
            rows_transferred: committed_rows,
            rows_total,
            batches: committed_batches,
            already_complete: false,
            duration,
            rows_per_second,
        })
    }

    /// Transform and write one batch inside its own transaction.
    async fn write_batch(
        &self,
        mapping: &TableMapping,
        columns: &[String],
        kinds: &[ColumnKind],
        rows: Vec<Row>,
    ) -> std::result::Result<(), String> {
        let expected = rows.len() as u64;
        let rows = rows
            .into_iter()
            .map(|row| transform_row(row, kinds))
            .collect::<std::result::Result<Vec<Row>, String>>()?;

        let mut tx = self.target.begin().await.map_err(|e| e.to_string())?;
        let written = tx
            .bulk_write(&mapping.target_schema, mapping.target_name(), columns, &rows)
            .await
            .map_err(|e| e.to_string())
            .and_then(|written| {
                if written == expected {
                    Ok(written)
                } else {
                    Err(format!("wrote {} of {} rows", written, expected))
                }
            });

        match written {
            Ok(_) => tx.commit().await.map_err(|e| e.to_string()),
            Err(message) => {
                if let Err(e) = tx.rollback().await {
                    warn!("Rollback failed for {}: {}", mapping.qualified_name(), e);
                }
                Err(message)
            }
        }
    }

    async fn fail_batch(
        &self,
        table: &str,
        batch: u64,
        offset_start: u64,
        offset_end: u64,
        message: String,
    ) -> MigrateError {
        let err = MigrateError::batch_transfer(table, batch, offset_start, offset_end, message);
        let mut tracker = self.tracker.lock().await;
        tracker.mark_object_failed(table, &err.to_string());
        if let Err(e) = tracker.persist() {
            warn!("Could not record failure of {}: {}", table, e);
        }
        err
    }
}

/// Read batches ahead of the writer. The task stops at the end of the
/// cursor, on the first error, or when the receiver is dropped.
fn spawn_reader(
    mut cursor: Box<dyn crate::core::RowCursor>,
    capacity: usize,
) -> mpsc::Receiver<Result<Vec<Row>>> {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        loop {
            match cursor.next_batch().await {
                Ok(Some(rows)) => {
                    if tx.send(Ok(rows)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });
    rx
}

fn rate(rows: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        rows as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationMode;
    use crate::core::{Catalog, ColumnDefinition, SqlValue, TableDefinition};
    use crate::schema::SchemaConverter;
    use crate::state::ProgressTracker;
    use crate::testing::{MemorySource, MemoryTarget};
    use crate::typemap::TypeMapper;
    use tempfile::TempDir;

    fn orders_table() -> TableDefinition {
        let mut t = TableDefinition::new("APP", "ORDERS");
        t.columns.push(ColumnDefinition::new("ID", "INTEGER", 1).not_null());
        t.columns.push(ColumnDefinition::new("NOTE", "VARCHAR(20)", 2));
        t.primary_key = vec!["ID".into()];
        t
    }

    fn rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|i| vec![SqlValue::Text(i.to_string()), SqlValue::Text(format!("n{}", i))])
            .collect()
    }

    struct Fixture {
        _dir: TempDir,
        source: Arc<MemorySource>,
        target: MemoryTarget,
        tracker: SharedTracker,
        mapping: TableMapping,
    }

    fn fixture(n: i64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let table = orders_table();
        let catalog = Catalog {
            tables: vec![table.clone()],
            ..Default::default()
        };
        let converter = SchemaConverter::new(TypeMapper::new(), "APP", "public");
        let plan = converter.plan(&catalog);
        let mapping = plan.tables[0].clone();
        let source = Arc::new(MemorySource::new(catalog).with_rows("APP.ORDERS", rows(n)));
        let target = MemoryTarget::new().with_table("public.ORDERS", &[("ID", "INTEGER"), ("NOTE", "VARCHAR(20)")]);
        let tracker = ProgressTracker::create(dir.path().join("cp.json"), MigrationMode::Full, "h", false)
            .unwrap()
            .into_shared();
        Fixture {
            _dir: dir,
            source,
            target,
            tracker,
            mapping,
        }
    }

    fn engine(f: &Fixture, batch_size: usize) -> TransferEngine {
        TransferEngine::new(
            f.source.clone(),
            Arc::new(f.target.clone()),
            f.tracker.clone(),
            TransferConfig {
                batch_size,
                read_ahead: 2,
            },
        )
    }

    #[tokio::test]
    async fn test_transfers_all_rows_in_batches() {
        let f = fixture(2500);
        let result = engine(&f, 1000).transfer_table(&f.mapping, 0).await.unwrap();

        assert_eq!(result.rows_transferred, 2500);
        assert_eq!(result.batches, 3);
        assert_eq!(f.target.commits(), 3);
        let written = f.target.rows("public.ORDERS");
        assert_eq!(written.len(), 2500);
        assert_eq!(written[0], vec![SqlValue::Int(1), SqlValue::Text("n1".into())]);

        let tracker = f.tracker.lock().await;
        assert!(tracker.is_completed("APP.ORDERS"));
        assert_eq!(tracker.resume_offset("APP.ORDERS"), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_and_keeps_offset() {
        let f = fixture(2500);
        f.target.fail_write_call(2);

        let err = engine(&f, 1000).transfer_table(&f.mapping, 0).await.unwrap_err();
        match err {
            MigrateError::BatchTransfer {
                batch,
                offset_start,
                offset_end,
                ..
            } => {
                assert_eq!(batch, 1);
                assert_eq!(offset_start, 1000);
                assert_eq!(offset_end, 2000);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Half of the failed batch was staged, none of it is visible.
        assert_eq!(f.target.rows("public.ORDERS").len(), 1000);
        let tracker = f.tracker.lock().await;
        assert_eq!(tracker.resume_offset("APP.ORDERS"), 1000);
        assert!(tracker.failed_objects().contains_key("APP.ORDERS"));
        assert!(!tracker.is_completed("APP.ORDERS"));
    }

    #[tokio::test]
    async fn test_resume_transfers_only_remaining_rows() {
        let f = fixture(5000);
        let cancel = CancellationToken::new();
        f.target.cancel_after_commits(3, cancel.clone());

        let err = engine(&f, 1000)
            .with_cancel(cancel)
            .transfer_table(&f.mapping, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        let offset = f.tracker.lock().await.resume_offset("APP.ORDERS");
        assert_eq!(offset, 3000);

        let result = engine(&f, 1000).transfer_table(&f.mapping, offset).await.unwrap();
        assert_eq!(result.batches, 2);
        assert_eq!(result.rows_transferred, 2000);
        assert_eq!(f.target.commits(), 5);

        let ids: Vec<SqlValue> = f
            .target
            .rows("public.ORDERS")
            .into_iter()
            .map(|r| r[0].clone())
            .collect();
        let expected: Vec<SqlValue> = (1..=5000).map(SqlValue::Int).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_completed_table_is_not_rewritten() {
        let f = fixture(10);
        engine(&f, 4).transfer_table(&f.mapping, 0).await.unwrap();
        let writes = f.target.write_calls();

        let again = engine(&f, 4).transfer_table(&f.mapping, 0).await.unwrap();
        assert!(again.already_complete);
        assert_eq!(f.target.write_calls(), writes);
        assert_eq!(f.target.rows("public.ORDERS").len(), 10);
    }

    #[tokio::test]
    async fn test_completed_table_resumed_at_row_count_writes_nothing() {
        let f = fixture(10);
        engine(&f, 4).transfer_table(&f.mapping, 0).await.unwrap();
        let writes = f.target.write_calls();
        let commits = f.target.commits();

        let again = engine(&f, 4).transfer_table(&f.mapping, 10).await.unwrap();
        assert!(again.already_complete);
        assert_eq!(again.rows_transferred, 0);
        assert_eq!(f.target.write_calls(), writes);
        assert_eq!(f.target.commits(), commits);
        assert_eq!(f.target.rows("public.ORDERS").len(), 10);
    }

    #[tokio::test]
    async fn test_offset_equal_to_source_count_completes_without_writing() {
        let f = fixture(8);
        let cancel = CancellationToken::new();
        f.target.cancel_after_commits(2, cancel.clone());

        // Both batches commit, then the run stops before noticing the end.
        let err = engine(&f, 4)
            .with_cancel(cancel)
            .transfer_table(&f.mapping, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        {
            let tracker = f.tracker.lock().await;
            assert_eq!(tracker.resume_offset("APP.ORDERS"), 8);
            assert!(!tracker.is_completed("APP.ORDERS"));
        }
        let writes = f.target.write_calls();

        let result = engine(&f, 4).transfer_table(&f.mapping, 8).await.unwrap();
        assert!(!result.already_complete);
        assert_eq!(result.rows_total, 8);
        assert_eq!(result.rows_transferred, 0);
        assert_eq!(result.batches, 0);
        assert_eq!(f.target.write_calls(), writes);
        assert_eq!(f.target.rows("public.ORDERS").len(), 8);
        assert!(f.tracker.lock().await.is_completed("APP.ORDERS"));
    }

    #[tokio::test]
    async fn test_offset_beyond_source_is_corrupt() {
        let f = fixture(10);
        let err = engine(&f, 4).transfer_table(&f.mapping, 11).await.unwrap_err();
        assert!(matches!(err, MigrateError::CorruptState(_)));
        assert_eq!(f.target.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_table_completes() {
        let f = fixture(0);
        let result = engine(&f, 100).transfer_table(&f.mapping, 0).await.unwrap();
        assert_eq!(result.rows_transferred, 0);
        assert_eq!(result.batches, 0);
        assert!(f.tracker.lock().await.is_completed("APP.ORDERS"));
    }

    #[tokio::test]
    async fn test_bad_value_fails_batch_with_column() {
        let f = fixture(3);
        f.source.set_rows(
            "APP.ORDERS",
            vec![vec![SqlValue::Text("x".into()), SqlValue::Null]],
        );
        let err = engine(&f, 10).transfer_table(&f.mapping, 0).await.unwrap_err();
        assert!(err.to_string().contains("column 1"));
        assert_eq!(f.target.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_progress_counts_committed_rows() {
        let f = fixture(30);
        let progress = Arc::new(ProgressReporter::new());
        engine(&f, 10)
            .with_progress(progress.clone())
            .transfer_table(&f.mapping, 0)
            .await
            .unwrap();
        assert_eq!(progress.rows_transferred(), 30);
        assert_eq!(progress.tables_completed(), 1);
    }
}
