//! DB2 source over ODBC (IBM Data Server Driver / CLI driver).
//!
//! **Requirements:** the IBM DB2 ODBC/CLI driver must be installed and
//! registered under the name given in `source.driver`
//! (default `IBM DB2 ODBC DRIVER`).
//!
//! ODBC calls block, so every operation runs on the blocking thread pool
//! with its own connection. Table reads stream from a single cursor on a
//! dedicated blocking task that hands batches to the async side through a
//! bounded channel.
//!
//! Tables without LOB columns are fetched in blocks through text row sets.
//! LOB columns have no useful upper bound, so tables with any CLOB, DBCLOB,
//! BLOB or LONG column are read row by row and each value is drained in
//! chunks with `get_text`/`get_binary`.

mod catalog;

use async_trait::async_trait;
use odbc_api::buffers::TextRowSet;
use odbc_api::{Connection, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::identifier::{qualify, quote_list};
use crate::core::{Catalog, Row, RowCursor, SourceDatabase, SqlValue, TableDefinition};
use crate::error::{MigrateError, Result};

use super::retry::{connect_with_retry, RetryPolicy};

/// Upper bound on a text row set column. Non-LOB DB2 values are at most
/// 32672 bytes, which is 65344 characters once binary data is hex encoded.
/// Longer values fail the fetch instead of being truncated.
const MAX_TEXT_BYTES: usize = 65536;

/// Catalog text (view and routine bodies) can be much longer than row data,
/// so catalog queries fetch fewer rows per round trip with a larger limit.
const CATALOG_FETCH_ROWS: usize = 100;
const CATALOG_MAX_TEXT_BYTES: usize = 2 * 1024 * 1024;

/// Batches buffered between the ODBC reader and the transfer engine.
const CURSOR_CHANNEL_DEPTH: usize = 2;

/// A result row with every column rendered as text.
pub(crate) type TextRow = Vec<Option<String>>;

struct Shared {
    env: Environment,
    connection_string: String,
}

impl Shared {
    fn connect(&self) -> Result<Connection<'_>> {
        self.env
            .connect_with_connection_string(&self.connection_string, ConnectionOptions::default())
            .map_err(|e| MigrateError::Source(format!("ODBC connection failed: {}", e)))
    }
}

/// DB2 source database.
pub struct Db2Source {
    shared: Arc<Shared>,
    redacted: String,
}

impl Db2Source {
    /// Connect to DB2, retrying per the source configuration.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let env = Environment::new().map_err(|e| {
            MigrateError::pool(
                format!(
                    "Failed to create ODBC environment: {}. Make sure the IBM DB2 ODBC/CLI driver is installed.",
                    e
                ),
                "ODBC environment",
            )
        })?;
        let shared = Arc::new(Shared {
            env,
            connection_string: config.connection_string(),
        });
        let redacted = config.redacted();

        let policy = RetryPolicy::new(
            config.max_retries,
            config.retry_delay_ms,
            config.connect_timeout_secs,
        );
        connect_with_retry(&redacted, policy, || {
            let shared = shared.clone();
            async move {
                blocking(move || {
                    let conn = shared.connect()?;
                    query_text(&conn, "SELECT 1 FROM SYSIBM.SYSDUMMY1").map(|_| ())
                })
                .await
            }
        })
        .await?;

        info!("Connected to DB2 source: {}", redacted);
        Ok(Self { shared, redacted })
    }

    fn select_list(table: &TableDefinition) -> Result<String> {
        let names: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        quote_list(&names)
    }
}

/// Run blocking ODBC work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MigrateError::Source(format!("ODBC worker failed: {}", e)))?
}

/// Execute `sql` and collect every row as text.
pub(crate) fn query_text(conn: &Connection<'_>, sql: &str) -> Result<Vec<TextRow>> {
    let mut rows = Vec::new();
    stream_text(conn, sql, CATALOG_FETCH_ROWS, CATALOG_MAX_TEXT_BYTES, |batch| {
        rows.extend(batch);
        true
    })?;
    Ok(rows)
}

/// Execute `sql` and hand rows to `sink` in chunks of at most `batch_size`.
/// Stops early when `sink` returns false.
fn stream_text<F>(
    conn: &Connection<'_>,
    sql: &str,
    batch_size: usize,
    max_text: usize,
    mut sink: F,
) -> Result<()>
where
    F: FnMut(Vec<TextRow>) -> bool,
{
    let query_error = |e: odbc_api::Error| MigrateError::Source(format!("{} - SQL: {}", e, sql));

    let Some(mut cursor) = conn.execute(sql, ()).map_err(query_error)? else {
        return Ok(());
    };
    let num_cols = cursor.num_result_cols().map_err(query_error)? as usize;
    let mut buffers = TextRowSet::for_cursor(batch_size.max(1), &mut cursor, Some(max_text))
        .map_err(query_error)?;
    let mut row_cursor = cursor.bind_buffer(&mut buffers).map_err(query_error)?;

    while let Some(batch) = row_cursor
        .fetch_with_truncation_check(true)
        .map_err(query_error)?
    {
        let mut rows = Vec::with_capacity(batch.num_rows());
        for row_idx in 0..batch.num_rows() {
            let row: TextRow = (0..num_cols)
                .map(|col_idx| {
                    batch
                        .at(col_idx, row_idx)
                        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                })
                .collect();
            rows.push(row);
        }
        if !sink(rows) {
            break;
        }
    }
    Ok(())
}

fn to_row(text: TextRow) -> Row {
    text.into_iter()
        .map(|v| v.map(SqlValue::Text).unwrap_or(SqlValue::Null))
        .collect()
}

/// How the values of one column are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Bound in a text row set.
    Buffered,
    /// Drained with `get_text`, any length.
    LongText,
    /// Drained with `get_binary`, any length.
    LongBinary,
}

impl FetchMode {
    fn for_source_type(source_type: &str) -> Self {
        let upper = source_type.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        match base {
            "BLOB" => FetchMode::LongBinary,
            "LONG VARCHAR FOR BIT DATA" => FetchMode::LongBinary,
            "CLOB" | "DBCLOB" | "LONG VARCHAR" | "LONG VARGRAPHIC" | "XML" => FetchMode::LongText,
            _ => FetchMode::Buffered,
        }
    }
}

/// Fetch modes for the columns of `table`, or `None` when every column fits
/// a text row set.
fn long_column_modes(table: &TableDefinition) -> Option<Vec<FetchMode>> {
    let modes: Vec<FetchMode> = table
        .columns
        .iter()
        .map(|c| FetchMode::for_source_type(&c.source_type))
        .collect();
    modes.iter().any(|m| *m != FetchMode::Buffered).then_some(modes)
}

/// Build a value from a drained column buffer. `present` is false for NULL.
fn long_value(mode: FetchMode, present: bool, buf: Vec<u8>) -> SqlValue {
    match (present, mode) {
        (false, _) => SqlValue::Null,
        (true, FetchMode::LongBinary) => SqlValue::Bytes(buf),
        (true, _) => match String::from_utf8(buf) {
            Ok(text) => SqlValue::Text(text),
            Err(e) => SqlValue::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        },
    }
}

/// Execute `sql` and hand rows to `sink` in chunks of at most `batch_size`,
/// fetching one row at a time so values of any length are read whole.
/// Stops early when `sink` returns false.
fn stream_long<F>(
    conn: &Connection<'_>,
    sql: &str,
    batch_size: usize,
    modes: &[FetchMode],
    mut sink: F,
) -> Result<()>
where
    F: FnMut(Vec<Row>) -> bool,
{
    let query_error = |e: odbc_api::Error| MigrateError::Source(format!("{} - SQL: {}", e, sql));

    let Some(mut cursor) = conn.execute(sql, ()).map_err(query_error)? else {
        return Ok(());
    };
    let batch_size = batch_size.max(1);
    let mut rows = Vec::with_capacity(batch_size);
    while let Some(mut row) = cursor.next_row().map_err(query_error)? {
        let mut values = Vec::with_capacity(modes.len());
        for (i, mode) in modes.iter().enumerate() {
            let col = (i + 1) as u16;
            let mut buf = Vec::new();
            let present = match mode {
                FetchMode::LongBinary => row.get_binary(col, &mut buf),
                _ => row.get_text(col, &mut buf),
            }
            .map_err(query_error)?;
            values.push(long_value(*mode, present, buf));
        }
        rows.push(values);
        if rows.len() >= batch_size {
            let full = std::mem::replace(&mut rows, Vec::with_capacity(batch_size));
            if !sink(full) {
                return Ok(());
            }
        }
    }
    if !rows.is_empty() {
        sink(rows);
    }
    Ok(())
}

/// Read the rows of `sql` over `table`'s columns, picking the block or the
/// row-by-row reader from the column types.
fn stream_table_rows<F>(
    conn: &Connection<'_>,
    table: &TableDefinition,
    sql: &str,
    batch_size: usize,
    mut sink: F,
) -> Result<()>
where
    F: FnMut(Vec<Row>) -> bool,
{
    match long_column_modes(table) {
        Some(modes) => {
            debug!(
                "{}: LOB columns present, fetching row by row",
                table.qualified_name()
            );
            stream_long(conn, sql, batch_size, &modes, sink)
        }
        None => stream_text(conn, sql, batch_size, MAX_TEXT_BYTES, |batch| {
            sink(batch.into_iter().map(to_row).collect())
        }),
    }
}

/// Batches produced by a reader task on the blocking pool.
struct Db2Cursor {
    rx: mpsc::Receiver<Result<Vec<Row>>>,
}

#[async_trait]
impl RowCursor for Db2Cursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>> {
        self.rx.recv().await.transpose()
    }
}

#[async_trait]
impl SourceDatabase for Db2Source {
    async fn extract_catalog(&self, schema: &str) -> Result<Catalog> {
        let shared = self.shared.clone();
        let schema = schema.to_string();
        debug!("Reading SYSCAT for schema {} on {}", schema, self.redacted);
        blocking(move || {
            let conn = shared.connect()?;
            catalog::extract(&conn, &schema)
        })
        .await
    }

    async fn open_cursor(
        &self,
        table: &TableDefinition,
        order_by: &[String],
        start_offset: u64,
        batch_size: usize,
    ) -> Result<Box<dyn RowCursor>> {
        let mut sql = format!(
            "SELECT {} FROM {}",
            Self::select_list(table)?,
            qualify(&table.schema, &table.name)?
        );
        if !order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", quote_list(order_by)?));
        }
        if start_offset > 0 {
            sql.push_str(&format!(" OFFSET {} ROWS", start_offset));
        }
        debug!("{}: {}", table.qualified_name(), sql);

        let (tx, rx) = mpsc::channel(CURSOR_CHANNEL_DEPTH);
        let shared = self.shared.clone();
        let table = table.clone();
        tokio::task::spawn_blocking(move || {
            let result = shared.connect().and_then(|conn| {
                stream_table_rows(&conn, &table, &sql, batch_size, |rows| {
                    tx.blocking_send(Ok(rows)).is_ok()
                })
            });
            if let Err(e) = result {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(Box::new(Db2Cursor { rx }))
    }

    async fn count_rows(&self, table: &TableDefinition) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT_BIG(*) FROM {}",
            qualify(&table.schema, &table.name)?
        );
        match self.query_scalar(&sql).await? {
            Some(SqlValue::Text(n)) => {
                let trimmed = n.trim();
                trimmed
                    .strip_suffix('.')
                    .unwrap_or(trimmed)
                    .parse()
                    .map_err(|_| MigrateError::Source(format!("unexpected row count {:?}", n)))
            }
            _ => Ok(0),
        }
    }

    async fn sample_rows(&self, table: &TableDefinition, n: usize) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY RAND() FETCH FIRST {} ROWS ONLY",
            Self::select_list(table)?,
            qualify(&table.schema, &table.name)?,
            n.max(1)
        );
        let shared = self.shared.clone();
        let table = table.clone();
        blocking(move || {
            let conn = shared.connect()?;
            let mut rows = Vec::new();
            stream_table_rows(&conn, &table, &sql, CATALOG_FETCH_ROWS, |batch| {
                rows.extend(batch);
                true
            })?;
            Ok(rows)
        })
        .await
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let shared = self.shared.clone();
        let sql = sql.to_string();
        blocking(move || {
            let conn = shared.connect()?;
            conn.execute(&sql, ())
                .map_err(|e| MigrateError::Source(format!("{} - SQL: {}", e, sql)))?;
            Ok(())
        })
        .await
    }

    async fn query_scalar(&self, sql: &str) -> Result<Option<SqlValue>> {
        let shared = self.shared.clone();
        let sql = sql.to_string();
        let rows = blocking(move || {
            let conn = shared.connect()?;
            query_text(&conn, &sql)
        })
        .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .map(|value| value.map(SqlValue::Text).unwrap_or(SqlValue::Null)))
    }
}
