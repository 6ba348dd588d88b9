//! Core abstractions shared by every phase of a migration.
//!
//! - [`schema`]: table, column, constraint, view, routine and trigger metadata
//! - [`value`]: SQL values and rows
//! - [`traits`]: source and target database seams
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{
    Catalog, CheckConstraint, ColumnDefinition, ForeignKey, IndexDefinition, ParamDirection,
    Parameter, ProcedureDefinition, RoutineKind, SequenceDefinition, TableDefinition,
    TriggerDefinition, UniqueConstraint, ViewDefinition,
};
pub use traits::{RowCursor, SourceDatabase, TargetColumn, TargetDatabase, TargetTransaction};
pub use value::{numeric_digits, plain_numeric, Row, SqlValue};
