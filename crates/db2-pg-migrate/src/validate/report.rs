//! Validation report types and rendering.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

use crate::error::Result;

/// Outcome of validating one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    Failed,
    Skipped,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Passed => "passed",
            ValidationStatus::Failed => "failed",
            ValidationStatus::Skipped => "skipped",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ValidationStatus::Passed => "PASS",
            ValidationStatus::Failed => "FAIL",
            ValidationStatus::Skipped => "SKIP",
        }
    }
}

/// How a target column differs from the mapped source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    MissingTable,
    MissingColumn,
    TypeMismatch,
    OrdinalMismatch,
    ExtraColumn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDifference {
    pub kind: DifferenceKind,
    pub column: Option<String>,
    pub detail: String,
}

impl SchemaDifference {
    /// Missing objects fail the table; the rest are warnings.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            DifferenceKind::MissingTable | DifferenceKind::MissingColumn
        )
    }
}

/// One differing value found by sampling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueMismatch {
    pub table: String,

    /// Primary key of the row, rendered as `COL=value` pairs.
    pub key: String,
    pub column: String,
    pub source_value: String,
    pub target_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableValidation {
    pub table: String,
    pub source_row_count: Option<u64>,
    pub target_row_count: Option<u64>,
    pub status: ValidationStatus,
    pub mismatches: Vec<ValueMismatch>,
    pub schema_differences: Vec<SchemaDifference>,
    pub rows_sampled: u64,
    pub notes: Vec<String>,
}

impl TableValidation {
    pub(crate) fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            source_row_count: None,
            target_row_count: None,
            status: ValidationStatus::Passed,
            mismatches: Vec::new(),
            schema_differences: Vec::new(),
            rows_sampled: 0,
            notes: Vec::new(),
        }
    }

    pub(crate) fn fail(&mut self, note: impl Into<String>) {
        self.status = ValidationStatus::Failed;
        self.notes.push(note.into());
    }
}

/// Result of a validation pass. Built once by the validator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub tables: Vec<TableValidation>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,

    /// Rows compared value by value across all tables.
    pub total_rows_compared: u64,
}

impl ValidationReport {
    pub(crate) fn from_tables(tables: Vec<TableValidation>) -> Self {
        let count = |s: ValidationStatus| tables.iter().filter(|t| t.status == s).count();
        Self {
            generated_at: Utc::now(),
            passed: count(ValidationStatus::Passed),
            failed: count(ValidationStatus::Failed),
            skipped: count(ValidationStatus::Skipped),
            total_rows_compared: tables.iter().map(|t| t.rows_sampled).sum(),
            tables,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn status(&self) -> ValidationStatus {
        if self.is_success() {
            ValidationStatus::Passed
        } else {
            ValidationStatus::Failed
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableValidation> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "VALIDATION REPORT");
        let _ = writeln!(out, "Generated: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(out, "{}", "=".repeat(60));

        for t in &self.tables {
            let counts = match (t.source_row_count, t.target_row_count) {
                (Some(s), Some(d)) => format!("source={} target={}", s, d),
                (Some(s), None) => format!("source={}", s),
                _ => String::new(),
            };
            let _ = writeln!(out, "{}  {}  {}", t.status.label(), t.table, counts);
            for diff in &t.schema_differences {
                let marker = if diff.is_failure() { "error" } else { "warning" };
                let _ = writeln!(out, "      schema {}: {}", marker, diff.detail);
            }
            for m in &t.mismatches {
                let _ = writeln!(
                    out,
                    "      mismatch [{}] {}: source={} target={}",
                    m.key, m.column, m.source_value, m.target_value
                );
            }
            for note in &t.notes {
                let _ = writeln!(out, "      {}", note);
            }
        }

        let _ = writeln!(out, "{}", "=".repeat(60));
        let _ = writeln!(
            out,
            "Result: {} ({} passed, {} failed, {} skipped, {} rows compared)",
            self.status().label(),
            self.passed,
            self.failed,
            self.skipped,
            self.total_rows_compared
        );
        out
    }

    /// Write the report as JSON when `path` ends in `.json`, text otherwise.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let content = if is_json { self.to_json()? } else { self.to_text() };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> ValidationReport {
        let mut ok = TableValidation::new("APP.PARENT");
        ok.source_row_count = Some(1000);
        ok.target_row_count = Some(1000);
        ok.rows_sampled = 100;

        let mut bad = TableValidation::new("APP.CHILD");
        bad.source_row_count = Some(1000);
        bad.target_row_count = Some(999);
        bad.fail("row count mismatch");

        let mut big = TableValidation::new("APP.HISTORY");
        big.status = ValidationStatus::Skipped;

        ValidationReport::from_tables(vec![ok, bad, big])
    }

    #[test]
    fn test_counts_and_status() {
        let report = sample_report();
        assert_eq!((report.passed, report.failed, report.skipped), (1, 1, 1));
        assert_eq!(report.total_rows_compared, 100);
        assert_eq!(report.status(), ValidationStatus::Failed);
    }

    #[test]
    fn test_text_rendering() {
        let text = sample_report().to_text();
        assert!(text.starts_with("VALIDATION REPORT"));
        assert!(text.contains("FAIL  APP.CHILD  source=1000 target=999"));
        assert!(text.contains("row count mismatch"));
        assert!(text.contains("Result: FAIL (1 passed, 1 failed, 1 skipped"));
    }

    #[test]
    fn test_json_rendering() {
        let json = sample_report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["failed"], 1);
        assert_eq!(value["tables"][1]["status"], "failed");
    }

    #[test]
    fn test_write_to_picks_format_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let report = sample_report();

        let json_path = dir.path().join("out/report.json");
        report.write_to(&json_path).unwrap();
        assert!(std::fs::read_to_string(&json_path).unwrap().starts_with('{'));

        let text_path = dir.path().join("report.txt");
        report.write_to(&text_path).unwrap();
        assert!(std::fs::read_to_string(&text_path)
            .unwrap()
            .starts_with("VALIDATION REPORT"));
    }
}
