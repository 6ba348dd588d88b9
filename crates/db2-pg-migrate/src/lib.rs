//! # db2-pg-migrate
//!
//! Resumable DB2 to PostgreSQL migration library.
//!
//! A run moves through fixed phases: extract the DB2 catalog, convert it to
//! PostgreSQL DDL, create the schema, pre-validate, transfer data and
//! validate the result. Progress is checkpointed after every committed batch
//! so an interrupted run can resume where it stopped.
//!
//! - **Type mapping** from DB2 types to PostgreSQL, with per-column overrides
//! - **Schema conversion** of tables, constraints, indexes, sequences, views,
//!   routines and triggers, with manual-review output for what cannot be
//!   converted automatically
//! - **Bulk transfers** using the PostgreSQL COPY protocol and parallel
//!   table workers that respect foreign-key order
//! - **Resume capability** via an HMAC-signed JSON checkpoint file
//! - **Validation** of row counts, schema and sampled values
//!
//! ## Example
//!
//! ```rust,no_run
//! use db2_pg_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> db2_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::connect(config).await?;
//!     let summary = orchestrator.run().await;
//!     println!("Migrated {} rows", summary.rows_transferred);
//!     std::process::exit(summary.exit_code() as i32);
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod schema;
pub mod state;
pub mod transfer;
pub mod typemap;
pub mod validate;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, LogFormat, MigrationConfig, MigrationMode, SourceConfig, TargetConfig};
pub use drivers::{Db2Source, PgTarget};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationSummary, Orchestrator, Phase, PhaseOutcome, RunStatus};
pub use progress::ProgressUpdate;
pub use schema::{ConversionPlan, SchemaConverter};
pub use state::ProgressTracker;
pub use transfer::TransferEngine;
pub use typemap::TypeMapper;
pub use validate::{ValidationReport, ValidationStatus, Validator};
