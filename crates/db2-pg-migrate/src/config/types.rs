//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Source database configuration (DB2).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Checkpoint (resume) configuration.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Post-migration validation configuration.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Logging configuration (consumed by the CLI).
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source database (DB2) configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// ODBC driver name (default: "IBM DB2 ODBC DRIVER").
    #[serde(default = "default_db2_driver")]
    pub driver: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 50000).
    #[serde(default = "default_db2_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Source schema. Defaults to the connecting user's schema when empty.
    #[serde(default)]
    pub schema: String,

    /// Per-attempt connection timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Connection attempts before giving up (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between connection attempts in milliseconds (default: 1000).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// Maximum pooled connections (default: workers + 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Per-attempt connection timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Connection attempts before giving up (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between connection attempts in milliseconds (default: 1000).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("schema", &self.schema)
            .finish()
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("schema", &self.schema)
            .finish()
    }
}

/// Which phases a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Extract, convert, create schema, transfer data, validate.
    #[default]
    Full,
    /// Everything except data transfer.
    SchemaOnly,
    /// Transfer into an existing target schema, then validate.
    DataOnly,
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationMode::Full => write!(f, "full"),
            MigrationMode::SchemaOnly => write!(f, "schema_only"),
            MigrationMode::DataOnly => write!(f, "data_only"),
        }
    }
}

impl std::str::FromStr for MigrationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "full" => Ok(MigrationMode::Full),
            "schema_only" => Ok(MigrationMode::SchemaOnly),
            "data_only" => Ok(MigrationMode::DataOnly),
            other => Err(format!(
                "unknown mode '{}' (expected full, schema_only or data_only)",
                other
            )),
        }
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    /// Phases to run (default: full).
    #[serde(default)]
    pub mode: MigrationMode,

    /// Rows per transfer batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Keep going past non-fatal table failures (default: false).
    #[serde(default)]
    pub continue_on_error: bool,

    /// Concurrent table transfers (default: 1).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Tables to include (glob patterns on the table name). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (glob patterns on the table name).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Create secondary indexes (default: true).
    #[serde(default = "default_true")]
    pub create_indexes: bool,

    /// Create foreign keys (default: true).
    #[serde(default = "default_true")]
    pub create_foreign_keys: bool,

    /// Migrate views (default: true).
    #[serde(default = "default_true")]
    pub migrate_views: bool,

    /// Migrate stored procedures and functions (default: true).
    #[serde(default = "default_true")]
    pub migrate_procedures: bool,

    /// Migrate triggers (default: true).
    #[serde(default = "default_true")]
    pub migrate_triggers: bool,

    /// Migrate standalone sequences (default: true).
    #[serde(default = "default_true")]
    pub migrate_sequences: bool,

    /// Directory for objects that need manual conversion.
    #[serde(default = "default_manual_review_dir")]
    pub manual_review_dir: PathBuf,

    /// Exact source type -> target type mappings tried before the built-in rules.
    #[serde(default)]
    pub type_overrides: BTreeMap<String, String>,

    /// Target type used (with a warning) when no rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_type_fallback: Option<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            mode: MigrationMode::default(),
            batch_size: default_batch_size(),
            continue_on_error: false,
            workers: default_workers(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            create_indexes: true,
            create_foreign_keys: true,
            migrate_views: true,
            migrate_procedures: true,
            migrate_triggers: true,
            migrate_sequences: true,
            manual_review_dir: default_manual_review_dir(),
            type_overrides: BTreeMap::new(),
            unsupported_type_fallback: None,
        }
    }
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Checkpoint file location.
    #[serde(default = "default_checkpoint_file")]
    pub file: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            file: default_checkpoint_file(),
        }
    }
}

/// Post-migration validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    /// Run the Validate phase (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Compare source and target row counts (default: true).
    #[serde(default = "default_true")]
    pub row_count: bool,

    /// Compare column sets and types (default: true).
    #[serde(default = "default_true")]
    pub schema: bool,

    /// Compare a random sample of rows (default: true).
    #[serde(default = "default_true")]
    pub sampling: bool,

    /// Rows sampled per table (default: 100).
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Tables with more source rows than this are reported as skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_above_rows: Option<u64>,

    /// Relative tolerance for floating point comparison (default: 1e-9).
    #[serde(default = "default_float_tolerance")]
    pub float_tolerance: f64,

    /// Write the text report here as well as logging it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_file: Option<PathBuf>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            row_count: true,
            schema: true,
            sampling: true,
            sample_size: default_sample_size(),
            skip_above_rows: None,
            float_tolerance: default_float_tolerance(),
            report_file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Level: debug, info, warn, error (default: info).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (default: text).
    #[serde(default)]
    pub format: LogFormat,

    /// Also append logs to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

impl TargetConfig {
    /// Pool size, defaulting to the worker count plus room for DDL and validation.
    pub fn get_max_connections(&self, workers: usize) -> usize {
        self.max_connections.unwrap_or(workers + 2)
    }
}

fn default_db2_driver() -> String {
    "IBM DB2 ODBC DRIVER".to_string()
}

fn default_db2_port() -> u16 {
    50000
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    1000
}

fn default_workers() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_manual_review_dir() -> PathBuf {
    PathBuf::from("failed_conversions")
}

fn default_checkpoint_file() -> PathBuf {
    PathBuf::from(".db2pg_checkpoint.json")
}

fn default_sample_size() -> usize {
    100
}

fn default_float_tolerance() -> f64 {
    1e-9
}

fn default_log_level() -> String {
    "info".to_string()
}
