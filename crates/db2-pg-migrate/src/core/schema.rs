//! Schema and metadata types for tables, columns, constraints and the
//! non-table objects (views, sequences, routines, triggers) read from the
//! source catalog.
//!
//! These are plain immutable descriptions: extraction builds them once and
//! every later phase only reads them.

use serde::{Deserialize, Serialize};

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,

    /// Source type as reported by the catalog (e.g. "DECIMAL(10,2)", "VARCHAR(50) FOR BIT DATA").
    pub source_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Default expression in source syntax.
    pub default: Option<String>,

    /// Ordinal position (1-based).
    pub ordinal: u32,

    /// Whether the column is an identity column.
    #[serde(default)]
    pub is_identity: bool,
}

impl ColumnDefinition {
    /// Nullable, non-identity column without a default.
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            nullable: true,
            default: None,
            ordinal,
            is_identity: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.nullable = false;
        self
    }
}

/// Foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,

    /// Columns in the owning table.
    pub columns: Vec<String>,

    /// Referenced table schema.
    pub ref_schema: String,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced columns.
    pub ref_columns: Vec<String>,

    /// ON DELETE action (e.g. "CASCADE", "NO ACTION").
    pub on_delete: String,

    /// ON UPDATE action.
    pub on_update: String,
}

impl ForeignKey {
    /// Qualified name of the referenced table.
    pub fn referenced_table(&self) -> String {
        format!("{}.{}", self.ref_schema, self.ref_table)
    }
}

/// Unique constraint (other than the primary key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// Check constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConstraint {
    /// Constraint name.
    pub name: String,

    /// Boolean expression in source syntax.
    pub definition: String,
}

/// Secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name.
    pub name: String,

    /// Key columns in order.
    pub columns: Vec<String>,

    /// Key columns sorted in descending order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub descending: Vec<String>,

    /// Whether the index is unique.
    pub is_unique: bool,
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions, ordered by ordinal.
    pub columns: Vec<ColumnDefinition>,

    /// Primary key column names.
    pub primary_key: Vec<String>,

    /// Unique constraints.
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraint>,

    /// Check constraints.
    #[serde(default)]
    pub check_constraints: Vec<CheckConstraint>,

    /// Foreign key constraints.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,

    /// Non-primary key indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique_constraints: Vec::new(),
            check_constraints: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Get the fully qualified table name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Columns that give a stable read order: the primary key, else none (physical order).
    pub fn order_columns(&self) -> &[String] {
        &self.primary_key
    }

    /// Look up a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Qualified names of the tables this one references, without duplicates or itself.
    pub fn referenced_tables(&self) -> Vec<String> {
        let own = self.qualified_name();
        let mut refs: Vec<String> = Vec::new();
        for fk in &self.foreign_keys {
            let target = fk.referenced_table();
            if target != own && !refs.contains(&target) {
                refs.push(target);
            }
        }
        refs
    }

    pub fn has_identity(&self) -> bool {
        self.columns.iter().any(|c| c.is_identity)
    }
}

/// View metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub schema: String,
    pub name: String,

    /// Full `CREATE VIEW` text in source syntax.
    pub definition: String,

    /// Qualified names of the tables and views the view reads from.
    #[serde(default)]
    pub references: Vec<String>,
}

impl ViewDefinition {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Standalone sequence metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    pub schema: String,
    pub name: String,
    pub start: i64,
    pub increment: i64,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub cycle: bool,
    pub cache: Option<i64>,

    /// Next value the source would hand out, if known.
    #[serde(default)]
    pub next_value: Option<i64>,
}

impl SequenceDefinition {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Stored routine kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    Procedure,
    Function,
}

/// Routine parameter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamDirection {
    In,
    Out,
    InOut,
}

/// Routine parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub source_type: String,
    pub direction: ParamDirection,
}

/// Stored procedure or function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureDefinition {
    pub schema: String,
    pub name: String,
    pub kind: RoutineKind,

    /// Full routine text in source syntax.
    pub definition: String,

    /// Parameters in declaration order.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl ProcedureDefinition {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Trigger metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub schema: String,
    pub name: String,

    /// Qualified name of the owning table.
    pub table: String,

    /// Full `CREATE TRIGGER` text in source syntax.
    pub definition: String,
}

impl TriggerDefinition {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Everything extracted from one source schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub tables: Vec<TableDefinition>,
    pub views: Vec<ViewDefinition>,
    pub sequences: Vec<SequenceDefinition>,
    pub procedures: Vec<ProcedureDefinition>,
    pub triggers: Vec<TriggerDefinition>,
}

impl Catalog {
    pub fn table(&self, qualified_name: &str) -> Option<&TableDefinition> {
        self.tables
            .iter()
            .find(|t| t.qualified_name() == qualified_name)
    }

    /// Total number of objects of every kind.
    pub fn object_count(&self) -> usize {
        self.tables.len()
            + self.views.len()
            + self.sequences.len()
            + self.procedures.len()
            + self.triggers.len()
    }
}
