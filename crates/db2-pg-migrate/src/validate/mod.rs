//! Post-migration validation.
//!
//! Three checks per table, each switchable in [`ValidationConfig`]:
//!
//! - schema: every mapped column exists in the target with an equivalent type
//! - row count: `COUNT(*)` on both sides must match exactly
//! - sampling: random source rows are looked up by primary key in the target
//!   and compared value by value
//!
//! A table fails on a missing table or column, a count mismatch, or any
//! differing sampled value. Type and ordinal differences are warnings.

mod report;

pub use report::{
    DifferenceKind, SchemaDifference, TableValidation, ValidationReport, ValidationStatus,
    ValueMismatch,
};

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ValidationConfig;
use crate::core::{SourceDatabase, SqlValue, TargetColumn, TargetDatabase};
use crate::error::Result;
use crate::progress::ProgressReporter;
use crate::schema::TableMapping;
use crate::transfer::{transform_row, ColumnKind};
use crate::typemap::types_equivalent;

/// Compares migrated tables between source and target.
pub struct Validator {
    source: Arc<dyn SourceDatabase>,
    target: Arc<dyn TargetDatabase>,
    config: ValidationConfig,
    progress: Arc<ProgressReporter>,
}

impl Validator {
    pub fn new(
        source: Arc<dyn SourceDatabase>,
        target: Arc<dyn TargetDatabase>,
        config: ValidationConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
            progress: Arc::new(ProgressReporter::new()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Run every enabled check on `tables`, sampling up to `sample_size` rows each.
    pub async fn validate(&self, tables: &[TableMapping], sample_size: usize) -> ValidationReport {
        let mut results = Vec::with_capacity(tables.len());
        for mapping in tables {
            let result = self.validate_table(mapping, sample_size).await;
            self.finish_table(&result);
            results.push(result);
        }
        self.build_report(results)
    }

    /// Schema check only, for runs that moved no data.
    pub async fn validate_schema_only(&self, tables: &[TableMapping]) -> ValidationReport {
        let mut results = Vec::with_capacity(tables.len());
        for mapping in tables {
            let mut result = TableValidation::new(mapping.qualified_name());
            if let Err(e) = self.check_schema(mapping, &mut result).await {
                result.fail(format!("validation error: {}", e));
            }
            self.finish_table(&result);
            results.push(result);
        }
        self.build_report(results)
    }

    fn finish_table(&self, result: &TableValidation) {
        match result.status {
            ValidationStatus::Failed => warn!("{}: validation FAILED", result.table),
            ValidationStatus::Skipped => info!("{}: validation skipped", result.table),
            ValidationStatus::Passed => debug!("{}: validation passed", result.table),
        }
        self.progress
            .table_validated(&result.table, result.status.as_str());
    }

    fn build_report(&self, results: Vec<TableValidation>) -> ValidationReport {
        let report = ValidationReport::from_tables(results);
        info!(
            "Validation {}: {} passed, {} failed, {} skipped",
            report.status().as_str(),
            report.passed,
            report.failed,
            report.skipped
        );
        report
    }

    async fn validate_table(&self, mapping: &TableMapping, sample_size: usize) -> TableValidation {
        let mut result = TableValidation::new(mapping.qualified_name());
        if let Err(e) = self.run_checks(mapping, sample_size, &mut result).await {
            result.fail(format!("validation error: {}", e));
        }
        result
    }

    async fn run_checks(
        &self,
        mapping: &TableMapping,
        sample_size: usize,
        result: &mut TableValidation,
    ) -> Result<()> {
        let source_count = self.source.count_rows(&mapping.source).await?;
        result.source_row_count = Some(source_count);

        if let Some(limit) = self.config.skip_above_rows {
            if source_count > limit {
                result.status = ValidationStatus::Skipped;
                result
                    .notes
                    .push(format!("{} rows exceeds the {} row limit", source_count, limit));
                return Ok(());
            }
        }

        if self.config.schema && self.check_schema(mapping, result).await?.is_none() {
            return Ok(());
        }
        if result.status == ValidationStatus::Failed {
            return Ok(());
        }

        if self.config.row_count {
            let target_count = self
                .target
                .count_rows(&mapping.target_schema, mapping.target_name())
                .await?;
            result.target_row_count = Some(target_count);
            if target_count != source_count {
                result.fail(format!(
                    "row count mismatch: source has {}, target has {}",
                    source_count, target_count
                ));
            }
        }

        if self.config.sampling && sample_size > 0 {
            if mapping.source.has_pk() {
                self.check_sample(mapping, sample_size, result).await?;
            } else {
                result
                    .notes
                    .push("no primary key, sampling skipped".to_string());
            }
        }

        Ok(())
    }

    /// Compare mapped columns with the target catalog. Returns the observed
    /// columns, or `None` when the table is missing.
    async fn check_schema(
        &self,
        mapping: &TableMapping,
        result: &mut TableValidation,
    ) -> Result<Option<Vec<TargetColumn>>> {
        let Some(observed) = self
            .target
            .describe_table(&mapping.target_schema, mapping.target_name())
            .await?
        else {
            result.schema_differences.push(SchemaDifference {
                kind: DifferenceKind::MissingTable,
                column: None,
                detail: format!(
                    "table {}.{} does not exist in the target",
                    mapping.target_schema,
                    mapping.target_name()
                ),
            });
            result.status = ValidationStatus::Failed;
            return Ok(None);
        };

        result.schema_differences.extend(compare_columns(mapping, &observed));
        if result.schema_differences.iter().any(|d| d.is_failure()) {
            result.status = ValidationStatus::Failed;
        }
        Ok(Some(observed))
    }

    async fn check_sample(
        &self,
        mapping: &TableMapping,
        sample_size: usize,
        result: &mut TableValidation,
    ) -> Result<()> {
        let kinds: Vec<ColumnKind> = mapping
            .columns
            .iter()
            .map(|c| ColumnKind::from_target_type(&c.target_type))
            .collect();
        let fixed: Vec<bool> = mapping
            .columns
            .iter()
            .map(|c| is_fixed_length(&c.target_type))
            .collect();
        let columns = mapping.column_names();
        let key_idx: Vec<usize> = mapping
            .source
            .primary_key
            .iter()
            .filter_map(|k| columns.iter().position(|c| c.eq_ignore_ascii_case(k)))
            .collect();
        let key_columns: Vec<String> = key_idx.iter().map(|&i| columns[i].clone()).collect();
        let table = mapping.qualified_name();

        let sample = self.source.sample_rows(&mapping.source, sample_size).await?;
        for raw in sample {
            let source_row = match transform_row(raw, &kinds) {
                Ok(row) => row,
                Err(e) => {
                    result.fail(format!("unreadable source row: {}", e));
                    continue;
                }
            };
            let key: Vec<SqlValue> = key_idx.iter().map(|&i| source_row[i].clone()).collect();
            let key_label = key_columns
                .iter()
                .zip(&key)
                .map(|(c, v)| format!("{}={}", c, v))
                .collect::<Vec<_>>()
                .join(", ");
            result.rows_sampled += 1;

            let target_row = self
                .target
                .fetch_row_by_key(
                    &mapping.target_schema,
                    mapping.target_name(),
                    &columns,
                    &key_columns,
                    &key,
                )
                .await?;
            let Some(target_row) = target_row else {
                result.mismatches.push(ValueMismatch {
                    table: table.clone(),
                    key: key_label,
                    column: "*".to_string(),
                    source_value: "row".to_string(),
                    target_value: "<missing>".to_string(),
                });
                continue;
            };
            let target_row = match transform_row(target_row, &kinds) {
                Ok(row) => row,
                Err(e) => {
                    result.fail(format!("unreadable target row [{}]: {}", key_label, e));
                    continue;
                }
            };

            for (i, (s, t)) in source_row.iter().zip(&target_row).enumerate() {
                if !values_equal(s, t, fixed[i], self.config.float_tolerance) {
                    result.mismatches.push(ValueMismatch {
                        table: table.clone(),
                        key: key_label.clone(),
                        column: columns[i].clone(),
                        source_value: s.to_string(),
                        target_value: t.to_string(),
                    });
                }
            }
        }

        if !result.mismatches.is_empty() {
            result.fail(format!(
                "{} value mismatch(es) in {} sampled rows",
                result.mismatches.len(),
                result.rows_sampled
            ));
        }
        Ok(())
    }
}

/// Schema differences between the mapped columns and the observed ones.
pub(crate) fn compare_columns(mapping: &TableMapping, observed: &[TargetColumn]) -> Vec<SchemaDifference> {
    let mut diffs = Vec::new();
    for (position, expected) in mapping.columns.iter().enumerate() {
        let found = observed
            .iter()
            .find(|c| c.name == expected.name)
            .or_else(|| observed.iter().find(|c| c.name.eq_ignore_ascii_case(&expected.name)));
        let Some(found) = found else {
            diffs.push(SchemaDifference {
                kind: DifferenceKind::MissingColumn,
                column: Some(expected.name.clone()),
                detail: format!("column {} is missing", expected.name),
            });
            continue;
        };
        if !types_equivalent(&expected.target_type, &found.data_type) {
            diffs.push(SchemaDifference {
                kind: DifferenceKind::TypeMismatch,
                column: Some(expected.name.clone()),
                detail: format!(
                    "column {} has type {}, expected {}",
                    expected.name, found.data_type, expected.target_type
                ),
            });
        }
        let expected_ordinal = position as u32 + 1;
        if found.ordinal != expected_ordinal {
            diffs.push(SchemaDifference {
                kind: DifferenceKind::OrdinalMismatch,
                column: Some(expected.name.clone()),
                detail: format!(
                    "column {} is at position {}, expected {}",
                    expected.name, found.ordinal, expected_ordinal
                ),
            });
        }
    }
    for extra in observed {
        if !mapping
            .columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&extra.name))
        {
            diffs.push(SchemaDifference {
                kind: DifferenceKind::ExtraColumn,
                column: Some(extra.name.clone()),
                detail: format!("column {} exists only in the target", extra.name),
            });
        }
    }
    diffs
}

fn is_fixed_length(target_type: &str) -> bool {
    let normalized = crate::typemap::normalize_type(target_type);
    normalized == "CHAR" || normalized.starts_with("CHAR(") || normalized.starts_with("CHARACTER(")
}

/// Type-aware equality of a source and a target value.
pub fn values_equal(source: &SqlValue, target: &SqlValue, fixed_length: bool, tolerance: f64) -> bool {
    match (source, target) {
        (SqlValue::Float(a), SqlValue::Float(b)) => {
            if a.is_nan() || b.is_nan() {
                return a.is_nan() && b.is_nan();
            }
            if a == b {
                return true;
            }
            let scale = a.abs().max(b.abs()).max(1.0);
            (a - b).abs() <= tolerance * scale
        }
        (SqlValue::Decimal(a), SqlValue::Decimal(b)) => a == b,
        (SqlValue::Decimal(_) | SqlValue::Numeric(_), SqlValue::Decimal(_) | SqlValue::Numeric(_)) => {
            source.numeric_key() == target.numeric_key()
        }
        (SqlValue::Text(a), SqlValue::Text(b)) if fixed_length => {
            a.trim_end_matches(' ') == b.trim_end_matches(' ')
        }
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Catalog, ColumnDefinition, Row, TableDefinition};
    use crate::schema::SchemaConverter;
    use crate::testing::{MemorySource, MemoryTarget};
    use crate::typemap::TypeMapper;
    use rust_decimal::Decimal;

    fn table(name: &str, with_pk: bool) -> TableDefinition {
        let mut t = TableDefinition::new("APP", name);
        t.columns.push(ColumnDefinition::new("ID", "INTEGER", 1).not_null());
        t.columns.push(ColumnDefinition::new("CODE", "CHAR(5)", 2));
        t.columns.push(ColumnDefinition::new("PRICE", "DECIMAL(10,2)", 3));
        if with_pk {
            t.primary_key = vec!["ID".into()];
        }
        t
    }

    fn source_rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|i| {
                vec![
                    SqlValue::Text(i.to_string()),
                    SqlValue::Text("AB   ".into()),
                    SqlValue::Text(format!("{}.50", i)),
                ]
            })
            .collect()
    }

    fn target_rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|i| {
                vec![
                    SqlValue::Int(i),
                    SqlValue::Text("AB".into()),
                    SqlValue::Decimal(Decimal::new(i * 100 + 50, 2)),
                ]
            })
            .collect()
    }

    const COLUMNS: &[(&str, &str)] = &[("ID", "integer"), ("CODE", "character(5)"), ("PRICE", "numeric(10,2)")];

    fn setup(def: TableDefinition, source_n: i64, target_n: i64) -> (Validator, Vec<TableMapping>, MemoryTarget) {
        let name = def.qualified_name();
        let target_key = format!("public.{}", def.name);
        let catalog = Catalog {
            tables: vec![def],
            ..Default::default()
        };
        let plan = SchemaConverter::new(TypeMapper::new(), "APP", "public").plan(&catalog);
        let source = MemorySource::new(catalog).with_rows(&name, source_rows(source_n));
        let target = MemoryTarget::new().with_table(&target_key, COLUMNS);
        target.set_rows(&target_key, target_rows(target_n));
        let validator = Validator::new(
            Arc::new(source),
            Arc::new(target.clone()),
            ValidationConfig::default(),
        );
        (validator, plan.tables, target)
    }

    #[tokio::test]
    async fn test_matching_table_passes() {
        let (validator, tables, _) = setup(table("T", true), 50, 50);
        let report = validator.validate(&tables, 20).await;
        assert!(report.is_success(), "{}", report.to_text());
        let t = report.table("APP.T").unwrap();
        assert_eq!(t.rows_sampled, 20);
        assert!(t.mismatches.is_empty());
    }

    #[tokio::test]
    async fn test_one_missing_row_fails_table() {
        let (validator, tables, _) = setup(table("T", true), 1000, 999);
        let report = validator.validate(&tables, 0).await;
        let t = report.table("APP.T").unwrap();
        assert_eq!(t.status, ValidationStatus::Failed);
        assert_eq!(t.source_row_count, Some(1000));
        assert_eq!(t.target_row_count, Some(999));
        assert_eq!(report.status(), ValidationStatus::Failed);
    }

    #[tokio::test]
    async fn test_value_mismatch_is_recorded() {
        let (validator, tables, target) = setup(table("T", true), 3, 3);
        let mut rows = target_rows(3);
        rows[1][2] = SqlValue::Decimal(Decimal::new(999, 2));
        target.set_rows("public.T", rows);

        let report = validator.validate(&tables, 3).await;
        let t = report.table("APP.T").unwrap();
        assert_eq!(t.status, ValidationStatus::Failed);
        assert_eq!(t.mismatches.len(), 1);
        let m = &t.mismatches[0];
        assert_eq!(m.key, "ID=2");
        assert_eq!(m.column, "PRICE");
        assert_eq!(m.source_value, "2.50");
        assert_eq!(m.target_value, "9.99");
    }

    #[tokio::test]
    async fn test_numeric_compared_beyond_28_digits() {
        let (validator, tables, target) = setup(table("T", true), 2, 2);
        let mut rows = target_rows(2);
        // Same value as the source's 1.50, spelled at scale 30.
        rows[0][2] = SqlValue::Text("1.500000000000000000000000000000".into());
        // Differs from 2.50 only in the 31st digit.
        rows[1][2] = SqlValue::Text("2.500000000000000000000000000001".into());
        target.set_rows("public.T", rows);

        let report = validator.validate(&tables, 2).await;
        let t = report.table("APP.T").unwrap();
        assert_eq!(t.mismatches.len(), 1, "{}", report.to_text());
        let m = &t.mismatches[0];
        assert_eq!(m.key, "ID=2");
        assert_eq!(m.target_value, "2.500000000000000000000000000001");
    }

    #[tokio::test]
    async fn test_missing_target_row_is_a_mismatch() {
        let (validator, tables, target) = setup(table("T", true), 3, 3);
        let mut rows = target_rows(3);
        rows[0][0] = SqlValue::Int(99);
        target.set_rows("public.T", rows);

        let report = validator.validate(&tables, 3).await;
        let t = report.table("APP.T").unwrap();
        assert_eq!(t.mismatches[0].target_value, "<missing>");
    }

    #[tokio::test]
    async fn test_table_without_pk_skips_sampling() {
        let (validator, tables, _) = setup(table("T", false), 5, 5);
        let report = validator.validate(&tables, 5).await;
        let t = report.table("APP.T").unwrap();
        assert_eq!(t.status, ValidationStatus::Passed);
        assert_eq!(t.rows_sampled, 0);
        assert!(t.notes.iter().any(|n| n.contains("no primary key")));
    }

    #[tokio::test]
    async fn test_large_table_is_skipped() {
        let (validator, tables, _) = setup(table("T", true), 10, 3);
        let validator = Validator {
            config: ValidationConfig {
                skip_above_rows: Some(5),
                ..ValidationConfig::default()
            },
            ..validator
        };
        let report = validator.validate(&tables, 5).await;
        assert_eq!(report.skipped, 1);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_missing_table_and_column() {
        let (validator, tables, _) = setup(table("T", true), 1, 1);
        let mut elsewhere = tables.clone();
        elsewhere[0].target_schema = "other".into();
        let report = validator.validate(&elsewhere, 1).await;
        let t = &report.tables[0];
        assert_eq!(t.status, ValidationStatus::Failed);
        assert_eq!(t.schema_differences[0].kind, DifferenceKind::MissingTable);

        let mut extra = tables;
        extra[0].columns.push(crate::schema::MappedColumn {
            name: "NEW_COL".into(),
            source_type: "INTEGER".into(),
            target_type: "INTEGER".into(),
            nullable: true,
            warning: None,
        });
        let report = validator.validate_schema_only(&extra).await;
        let t = &report.tables[0];
        assert_eq!(t.status, ValidationStatus::Failed);
        assert!(t
            .schema_differences
            .iter()
            .any(|d| d.kind == DifferenceKind::MissingColumn));
    }

    #[test]
    fn test_type_difference_is_a_warning() {
        let catalog = Catalog {
            tables: vec![table("T", true)],
            ..Default::default()
        };
        let plan = SchemaConverter::new(TypeMapper::new(), "APP", "public").plan(&catalog);
        let observed = vec![
            TargetColumn { name: "ID".into(), data_type: "bigint".into(), ordinal: 1 },
            TargetColumn { name: "CODE".into(), data_type: "character(5)".into(), ordinal: 2 },
            TargetColumn { name: "PRICE".into(), data_type: "numeric(10,2)".into(), ordinal: 3 },
        ];
        let diffs = compare_columns(&plan.tables[0], &observed);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DifferenceKind::TypeMismatch);
        assert!(!diffs[0].is_failure());
    }

    #[test]
    fn test_values_equal_rules() {
        assert!(values_equal(&SqlValue::Float(0.1 + 0.2), &SqlValue::Float(0.3), false, 1e-9));
        assert!(!values_equal(&SqlValue::Float(1.0), &SqlValue::Float(1.1), false, 1e-9));
        assert!(values_equal(
            &SqlValue::Decimal(Decimal::new(150, 2)),
            &SqlValue::Decimal(Decimal::new(15, 1)),
            false,
            0.0
        ));
        assert!(values_equal(
            &SqlValue::Numeric("1234567890123456789012345678901".into()),
            &SqlValue::Numeric("1234567890123456789012345678901.0".into()),
            false,
            0.0
        ));
        assert!(!values_equal(
            &SqlValue::Numeric("0.123456789012345678901234567890".into()),
            &SqlValue::Numeric("0.123456789012345678901234567891".into()),
            false,
            0.0
        ));
        assert!(values_equal(&"AB   ".into(), &"AB".into(), true, 0.0));
        assert!(!values_equal(&"AB   ".into(), &"AB".into(), false, 0.0));
        assert!(!values_equal(&SqlValue::Bytes(vec![1]), &SqlValue::Bytes(vec![1, 0]), false, 0.0));
    }
}
