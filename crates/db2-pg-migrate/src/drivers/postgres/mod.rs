//! PostgreSQL target over a deadpool-postgres connection pool.
//!
//! Batches are written with `COPY ... FROM STDIN` inside an explicit
//! transaction held on one pooled connection, so a failed batch leaves
//! nothing behind.

mod copy;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::identifier::{qualify, quote_list};
use crate::core::{Row, SqlValue, TargetColumn, TargetDatabase, TargetTransaction};
use crate::error::{MigrateError, Result};

use super::retry::{connect_with_retry, RetryPolicy};

/// PostgreSQL target database.
pub struct PgTarget {
    pool: Pool,
}

impl PgTarget {
    /// Build the pool and verify one connection, retrying per the target
    /// configuration.
    pub async fn connect(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("db2-pg-migrate");

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)));

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(max_conns.max(1))
            .build()
            .map_err(|e| MigrateError::pool(e.to_string(), "creating PostgreSQL target pool"))?;

        let redacted = config.redacted();
        let policy = RetryPolicy::new(
            config.max_retries,
            config.retry_delay_ms,
            config.connect_timeout_secs,
        );
        connect_with_retry(&redacted, policy, || {
            let pool = pool.clone();
            async move {
                let client = pool.get().await.map_err(|e| {
                    MigrateError::pool(e.to_string(), "testing PostgreSQL target connection")
                })?;
                client.simple_query("SELECT 1").await?;
                Ok(())
            }
        })
        .await?;

        info!(
            "Connected to PostgreSQL target: {} (pool size {})",
            redacted, max_conns
        );
        Ok(Self { pool })
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "getting PostgreSQL connection"))
    }
}

#[async_trait]
impl TargetDatabase for PgTarget {
    async fn execute_ddl(&self, statement: &str) -> Result<()> {
        let client = self.client().await?;
        debug!("DDL: {}", statement);
        client.batch_execute(statement).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        let client = self.client().await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
        }))
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64> {
        let client = self.client().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", qualify(schema, table)?);
        let row = client.query_one(sql.as_str(), &[]).await?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn describe_table(&self, schema: &str, table: &str) -> Result<Option<Vec<TargetColumn>>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod), a.attnum::int4 \
                 FROM pg_attribute a \
                 JOIN pg_class c ON c.oid = a.attrelid \
                 JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = $1 AND c.relname = $2 \
                   AND c.relkind IN ('r', 'p') AND a.attnum > 0 AND NOT a.attisdropped \
                 ORDER BY a.attnum",
                &[&schema, &table],
            )
            .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            rows.iter()
                .map(|row| TargetColumn {
                    name: row.get(0),
                    data_type: row.get(1),
                    ordinal: row.get::<_, i32>(2).max(0) as u32,
                })
                .collect(),
        ))
    }

    async fn fetch_row_by_key(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        key: &[SqlValue],
    ) -> Result<Option<Row>> {
        let select = columns
            .iter()
            .map(|c| qualify_text(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let mut predicates = Vec::with_capacity(key_columns.len());
        for (column, value) in key_columns.iter().zip(key) {
            let ident = quote_list(std::slice::from_ref(column))?;
            predicates.push(match value {
                SqlValue::Null => format!("{} IS NULL", ident),
                v => format!("{} = {}", ident, v.to_pg_literal()),
            });
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            select,
            qualify(schema, table)?,
            predicates.join(" AND ")
        );

        let client = self.client().await?;
        let row = client.query_opt(sql.as_str(), &[]).await?;
        Ok(row.map(|row| {
            (0..columns.len())
                .map(|i| {
                    row.get::<_, Option<String>>(i)
                        .map(SqlValue::Text)
                        .unwrap_or(SqlValue::Null)
                })
                .collect()
        }))
    }
}

/// `"COL"::text`, so every value comes back in its canonical text form.
fn qualify_text(column: &str) -> Result<String> {
    Ok(format!("{}::text", quote_list(&[column.to_string()])?))
}

/// A transaction pinned to one pooled connection.
struct PgTransaction {
    client: Option<Object>,
}

impl PgTransaction {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| MigrateError::TargetStatement("transaction already finished".into()))
    }
}

#[async_trait]
impl TargetTransaction for PgTransaction {
    async fn bulk_write(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
            qualify(schema, table)?,
            quote_list(columns)?
        );
        let client = self.client()?;
        let sink = client.copy_in(sql.as_str()).await?;
        futures::pin_mut!(sink);
        sink.send(Bytes::from(copy::encode_rows(rows))).await?;
        let written = sink.finish().await?;
        Ok(written)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let client = self.client()?;
        client.batch_execute("COMMIT").await?;
        self.client = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let client = self.client()?;
        client.batch_execute("ROLLBACK").await?;
        self.client = None;
        Ok(())
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        // A connection with an open transaction must not go back to the pool.
        if let Some(client) = self.client.take() {
            warn!("Transaction dropped without commit or rollback; discarding its connection");
            drop(Object::take(client));
        }
    }
}
