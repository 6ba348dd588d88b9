//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the settings that shape a run, for resume validation.
    ///
    /// Logging and validation settings and the worker count are left out so
    /// they can be changed between an interrupted run and its resume.
    pub fn hash(&self) -> String {
        let mut migration = self.migration.clone();
        migration.workers = 0;
        let shaping = (&self.source, &self.target, &migration);
        let yaml = serde_yaml::to_string(&shaping).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl SourceConfig {
    /// Build an ODBC connection string for the DB2 CLI driver.
    pub fn connection_string(&self) -> String {
        let mut conn = format!(
            "Driver={{{}}};Hostname={};Port={};Protocol=TCPIP;Database={};Uid={};Pwd={};",
            self.driver, self.host, self.port, self.database, self.user, self.password
        );
        if !self.schema.is_empty() {
            conn.push_str(&format!("CurrentSchema={};", self.schema));
        }
        conn
    }

    /// Schema to extract, falling back to the connecting user's schema.
    pub fn effective_schema(&self) -> String {
        if self.schema.is_empty() {
            self.user.to_uppercase()
        } else {
            self.schema.clone()
        }
    }

    /// Connection string safe for logs.
    pub fn redacted(&self) -> String {
        format!("db2://{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl TargetConfig {
    /// Connection string safe for logs.
    pub fn redacted(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  host: db2host
  database: SAMPLE
  user: db2inst1
  password: secret
target:
  host: pghost
  database: sample
  user: postgres
  password: secret
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 50000);
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.migration.batch_size, 1000);
        assert_eq!(config.migration.workers, 1);
        assert_eq!(config.migration.mode, MigrationMode::Full);
        assert!(!config.migration.continue_on_error);
        assert_eq!(config.validation.sample_size, 100);
        assert_eq!(config.source.effective_schema(), "DB2INST1");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = format!("{}\nbogus: 1\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_mode_parsing() {
        let yaml = format!("{}\nmigration:\n  mode: schema_only\n", MINIMAL);
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.migration.mode, MigrationMode::SchemaOnly);
        assert_eq!("data-only".parse::<MigrationMode>(), Ok(MigrationMode::DataOnly));
        assert!("sometimes".parse::<MigrationMode>().is_err());
    }

    #[test]
    fn test_hash_ignores_logging_and_workers_but_not_batch_size() {
        let base = Config::from_yaml(MINIMAL).unwrap();
        let mut logging = base.clone();
        logging.logging.level = "debug".into();
        logging.migration.workers = 8;
        assert_eq!(base.hash(), logging.hash());

        let mut batch = base.clone();
        batch.migration.batch_size = 500;
        assert_ne!(base.hash(), batch.hash());
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_connection_string() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        let conn = config.source.connection_string();
        assert!(conn.starts_with("Driver={IBM DB2 ODBC DRIVER};"));
        assert!(conn.contains("Hostname=db2host;Port=50000;"));
        assert!(!conn.contains("CurrentSchema"));
    }
}
