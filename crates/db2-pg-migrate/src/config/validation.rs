//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    if config.source.max_retries == 0 {
        return Err(MigrateError::Config(
            "source.max_retries must be at least 1".into(),
        ));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.max_retries == 0 {
        return Err(MigrateError::Config(
            "target.max_retries must be at least 1".into(),
        ));
    }
    if let Some(0) = config.target.max_connections {
        return Err(MigrateError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }

    // Migration validation
    let migration = &config.migration;
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.workers == 0 {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if migration.workers > 64 {
        return Err(MigrateError::Config(format!(
            "migration.workers must be at most 64, got {}",
            migration.workers
        )));
    }
    for pattern in migration
        .include_tables
        .iter()
        .chain(migration.exclude_tables.iter())
    {
        glob::Pattern::new(pattern).map_err(|e| {
            MigrateError::Config(format!("invalid table pattern '{}': {}", pattern, e))
        })?;
    }
    if let Some(fallback) = &migration.unsupported_type_fallback {
        if fallback.trim().is_empty() {
            return Err(MigrateError::Config(
                "migration.unsupported_type_fallback cannot be empty".into(),
            ));
        }
    }

    // Validation settings
    if config.validation.sampling && config.validation.sample_size == 0 {
        return Err(MigrateError::Config(
            "validation.sample_size must be at least 1 when sampling is enabled".into(),
        ));
    }
    let tolerance = config.validation.float_tolerance;
    if tolerance.is_nan() || tolerance < 0.0 {
        return Err(MigrateError::Config(
            "validation.float_tolerance must be non-negative".into(),
        ));
    }

    match config.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => {
            return Err(MigrateError::Config(format!(
                "logging.level must be one of trace, debug, info, warn, error, got '{}'",
                other
            )))
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::from_yaml(
            r#"
source:
  host: db2host
  database: SAMPLE
  user: db2inst1
target:
  host: pghost
  database: sample
  user: postgres
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_target_database() {
        let mut config = valid_config();
        config.target.database = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_worker_bounds() {
        let mut config = valid_config();
        config.migration.workers = 0;
        assert!(validate(&config).is_err());
        config.migration.workers = 65;
        assert!(validate(&config).is_err());
        config.migration.workers = 8;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_bad_glob_rejected() {
        let mut config = valid_config();
        config.migration.include_tables = vec!["ORD[".to_string()];
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("ORD["));
    }

    #[test]
    fn test_bad_log_level() {
        let mut config = valid_config();
        config.logging.level = "loud".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_sample_size_with_sampling() {
        let mut config = valid_config();
        config.validation.sample_size = 0;
        assert!(validate(&config).is_err());
        config.validation.sampling = false;
        assert!(validate(&config).is_ok());
    }
}
