//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, out-of-range values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection could not be established after all retries
    #[error("Connection to {target} failed after {attempts} attempt(s): {message}")]
    Connection {
        target: String,
        attempts: u32,
        message: String,
    },

    /// Source database query error
    #[error("Source database error: {0}")]
    Source(String),

    /// Target database query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Target statement failed with driver-independent context
    #[error("Target statement failed: {0}")]
    TargetStatement(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// No mapping rule matched a source column type
    #[error("Unsupported source type: {0}")]
    UnsupportedType(String),

    /// A schema object could not be created on the target
    #[error("Failed to create {object}: {message}")]
    SchemaCreation { object: String, message: String },

    /// A data batch failed to transfer (and was rolled back)
    #[error(
        "Transfer failed for table {table} at batch {batch} (rows {offset_start}..{offset_end}): {message}"
    )]
    BatchTransfer {
        table: String,
        batch: u64,
        offset_start: u64,
        offset_end: u64,
        message: String,
    },

    /// Post-migration validation found mismatches
    #[error("Validation failed: {0}")]
    ValidationMismatch(String),

    /// Checkpoint is unreadable, tampered with, or inconsistent with the source
    #[error("Checkpoint is corrupt: {0}")]
    CorruptState(String),

    /// Another run owns the checkpoint, or one exists and resume was not requested
    #[error("Migration already in progress: {0}")]
    AlreadyInProgress(String),

    /// data_only mode found the target schema missing or incompatible
    #[error("Target pre-validation failed: {0}")]
    PreValidation(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since last run - cannot resume. Remove the checkpoint to start fresh.")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a SchemaCreation error
    pub fn schema_creation(object: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SchemaCreation {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create a BatchTransfer error
    pub fn batch_transfer(
        table: impl Into<String>,
        batch: u64,
        offset_start: u64,
        offset_end: u64,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::BatchTransfer {
            table: table.into(),
            batch,
            offset_start,
            offset_end,
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MigrateError::Connection { .. } | MigrateError::Pool { .. } | MigrateError::Io(_)
        )
    }

    /// Whether the error aborts the run regardless of `continue_on_error`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_)
                | MigrateError::Connection { .. }
                | MigrateError::CorruptState(_)
                | MigrateError::AlreadyInProgress(_)
                | MigrateError::PreValidation(_)
                | MigrateError::ConfigChanged
                | MigrateError::Cancelled
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Connection { .. } | MigrateError::Pool { .. } => 3,
            MigrateError::ValidationMismatch(_) => 4,
            MigrateError::CorruptState(_)
            | MigrateError::AlreadyInProgress(_)
            | MigrateError::ConfigChanged => 5,
            MigrateError::PreValidation(_) => 6,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
