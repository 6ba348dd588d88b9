//! Conversion of an extracted DB2 catalog into an ordered PostgreSQL creation plan.
//!
//! [`SchemaConverter::plan`] maps every column type, orders tables so that
//! foreign-key parents come first, and renders the DDL for every object:
//!
//! 1. table bodies (topological order over FK edges, discovery order on ties)
//! 2. foreign keys whose parent already exists, right after the child table
//! 3. deferred foreign keys (cycles and references outside the batch)
//! 4. indexes, sequences, views (ordered over their references)
//! 5. procedures, triggers and identity re-sync
//!
//! Objects that cannot be planned are not dropped; they are returned in
//! [`ConversionPlan::excluded`] with the reason and, when available, their
//! original definition for manual review.

pub mod ddl;
pub mod routine;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::{
    Catalog, ForeignKey, IndexDefinition, ProcedureDefinition, SequenceDefinition,
    TableDefinition, TriggerDefinition, ViewDefinition,
};
use crate::error::{MigrateError, Result};
use crate::typemap::TypeMapper;

pub use routine::{detect_complex_features, write_manual_review, RoutineConverter};

/// Kind of a planned schema object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    ForeignKey,
    Index,
    Sequence,
    View,
    Procedure,
    Trigger,
    IdentitySync,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::ForeignKey => "foreign_key",
            ObjectKind::Index => "index",
            ObjectKind::Sequence => "sequence",
            ObjectKind::View => "view",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Trigger => "trigger",
            ObjectKind::IdentitySync => "identity_sync",
        }
    }

    /// A failure to create this object prevents loading data into it.
    pub fn is_blocking(&self) -> bool {
        matches!(self, ObjectKind::Table)
    }

    /// Applied after the data load in full mode, so constraints are not
    /// checked row by row and triggers do not fire on migrated rows.
    pub fn runs_after_data(&self) -> bool {
        matches!(
            self,
            ObjectKind::ForeignKey
                | ObjectKind::Index
                | ObjectKind::Trigger
                | ObjectKind::IdentitySync
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source column with its resolved target type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedColumn {
    pub name: String,
    pub source_type: String,
    pub target_type: String,
    pub nullable: bool,

    /// Set when the mapping is approximate.
    pub warning: Option<String>,
}

/// A table scheduled for creation and data transfer.
#[derive(Debug, Clone)]
pub struct TableMapping {
    pub source: TableDefinition,
    pub target_schema: String,

    /// Columns in ordinal order.
    pub columns: Vec<MappedColumn>,

    /// Qualified names of in-batch tables this one references.
    pub depends_on: Vec<String>,
}

impl TableMapping {
    pub fn qualified_name(&self) -> String {
        self.source.qualified_name()
    }

    /// Target table name (case preserved).
    pub fn target_name(&self) -> &str {
        &self.source.name
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// One DDL-bearing entry of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanItem {
    pub kind: ObjectKind,

    /// Qualified source name of the object.
    pub name: String,

    /// Owning table, for table-scoped objects.
    pub table: Option<String>,

    /// Target statements, run in order.
    pub statements: Vec<String>,

    /// Original source text, kept for manual review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_definition: Option<String>,

    pub warnings: Vec<String>,
}

impl PlanItem {
    fn new(kind: ObjectKind, name: impl Into<String>, rendered: Rendered) -> Self {
        Self {
            kind,
            name: name.into(),
            table: None,
            statements: rendered.statements,
            source_definition: None,
            warnings: rendered.warnings,
        }
    }

    fn on_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    fn with_source(mut self, definition: impl Into<String>) -> Self {
        self.source_definition = Some(definition.into());
        self
    }

    /// Stable identity used to record creation in the checkpoint.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }

    /// Procedural objects that converted with warnings.
    pub fn needs_review(&self) -> bool {
        self.source_definition.is_some() && !self.warnings.is_empty()
    }
}

/// An object left out of the plan, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct ExcludedObject {
    pub kind: ObjectKind,
    pub name: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_definition: Option<String>,
}

/// Statements and warnings rendered for one object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub statements: Vec<String>,
    pub warnings: Vec<String>,
}

impl Rendered {
    fn statement(sql: String) -> Self {
        Self {
            statements: vec![sql],
            warnings: Vec::new(),
        }
    }

    pub fn needs_review(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A source object handed to [`SchemaConverter::render_ddl`].
#[derive(Debug, Clone, Copy)]
pub enum SourceObject<'a> {
    Table(&'a TableDefinition),
    ForeignKey(&'a TableDefinition, &'a ForeignKey),
    Index(&'a TableDefinition, &'a IndexDefinition),
    Sequence(&'a SequenceDefinition),
    View(&'a ViewDefinition),
    Procedure(&'a ProcedureDefinition),
    Trigger(&'a TriggerDefinition),
    IdentitySync(&'a TableDefinition),
}

/// Ordered creation plan for one catalog.
#[derive(Debug, Clone, Default)]
pub struct ConversionPlan {
    /// Tables in creation and transfer order.
    pub tables: Vec<TableMapping>,

    /// Every DDL item in execution order.
    pub items: Vec<PlanItem>,

    pub excluded: Vec<ExcludedObject>,

    /// Conversion warnings not tied to a single item.
    pub warnings: Vec<String>,
}

impl ConversionPlan {
    pub fn table(&self, qualified_name: &str) -> Option<&TableMapping> {
        self.tables
            .iter()
            .find(|t| t.qualified_name() == qualified_name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.qualified_name()).collect()
    }

    /// Items to run before any data is loaded.
    pub fn items_before_data(&self) -> impl Iterator<Item = &PlanItem> {
        self.items.iter().filter(|i| !i.kind.runs_after_data())
    }

    /// Items to run once data is loaded.
    pub fn items_after_data(&self) -> impl Iterator<Item = &PlanItem> {
        self.items.iter().filter(|i| i.kind.runs_after_data())
    }

    /// Every planned table that (transitively) references `table`.
    pub fn dependents_of(&self, table: &str) -> Vec<String> {
        let mut blocked: Vec<String> = Vec::new();
        let mut frontier = vec![table.to_string()];
        while let Some(current) = frontier.pop() {
            for candidate in &self.tables {
                let name = candidate.qualified_name();
                if candidate.depends_on.contains(&current) && !blocked.contains(&name) {
                    blocked.push(name.clone());
                    frontier.push(name);
                }
            }
        }
        blocked
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Total warnings across items and the plan itself.
    pub fn warning_count(&self) -> usize {
        self.warnings.len() + self.items.iter().map(|i| i.warnings.len()).sum::<usize>()
    }
}

/// Which optional object kinds to plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    pub foreign_keys: bool,
    pub indexes: bool,
    pub sequences: bool,
    pub views: bool,
    pub procedures: bool,
    pub triggers: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            foreign_keys: true,
            indexes: true,
            sequences: true,
            views: true,
            procedures: true,
            triggers: true,
        }
    }
}

/// Builds creation plans and renders target DDL.
#[derive(Debug, Clone)]
pub struct SchemaConverter {
    mapper: TypeMapper,
    target_schema: String,
    options: PlanOptions,
    routines: RoutineConverter,
}

impl SchemaConverter {
    pub fn new(
        mapper: TypeMapper,
        source_schema: impl Into<String>,
        target_schema: impl Into<String>,
    ) -> Self {
        let target_schema = target_schema.into();
        Self {
            mapper,
            routines: RoutineConverter::new(source_schema, target_schema.clone()),
            target_schema,
            options: PlanOptions::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let m = &config.migration;
        Self::new(
            TypeMapper::from_config(m),
            config.source.effective_schema(),
            config.target.schema.clone(),
        )
        .with_options(PlanOptions {
            foreign_keys: m.create_foreign_keys,
            indexes: m.create_indexes,
            sequences: m.migrate_sequences,
            views: m.migrate_views,
            procedures: m.migrate_procedures,
            triggers: m.migrate_triggers,
        })
    }

    pub fn with_options(mut self, options: PlanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn mapper(&self) -> &TypeMapper {
        &self.mapper
    }

    pub fn target_schema(&self) -> &str {
        &self.target_schema
    }

    /// Resolve the target type of every column, in ordinal order.
    pub fn map_table(&self, table: &TableDefinition) -> Result<Vec<MappedColumn>> {
        table
            .columns
            .iter()
            .map(|col| {
                let mapping = self.mapper.map(&col.source_type).map_err(|e| match e {
                    MigrateError::UnsupportedType(t) => MigrateError::UnsupportedType(format!(
                        "{} (column {}.{})",
                        t,
                        table.qualified_name(),
                        col.name
                    )),
                    other => other,
                })?;
                Ok(MappedColumn {
                    name: col.name.clone(),
                    source_type: col.source_type.clone(),
                    target_type: mapping.target_type,
                    nullable: col.nullable,
                    warning: mapping
                        .warning
                        .map(|w| format!("{}.{}: {}", table.qualified_name(), col.name, w)),
                })
            })
            .collect()
    }

    /// Render the target statements for one source object.
    pub fn render_ddl(&self, object: SourceObject<'_>) -> Result<Rendered> {
        let schema = &self.target_schema;
        match object {
            SourceObject::Table(table) => {
                let columns = self.map_table(table)?;
                self.render_table(table, &columns)
            }
            SourceObject::ForeignKey(table, fk) => {
                ddl::render_foreign_key(table, fk, schema).map(Rendered::statement)
            }
            SourceObject::Index(table, index) => {
                ddl::render_index(table, index, schema).map(Rendered::statement)
            }
            SourceObject::Sequence(seq) => ddl::render_sequence(seq, schema).map(Rendered::statement),
            SourceObject::View(view) => self.routines.convert_view(view).map(Rendered::statement),
            SourceObject::Procedure(routine) => self.routines.convert_routine(routine),
            SourceObject::Trigger(trigger) => self.routines.convert_trigger(trigger),
            SourceObject::IdentitySync(table) => Ok(Rendered {
                statements: ddl::render_identity_sync(table, schema)?,
                warnings: Vec::new(),
            }),
        }
    }

    fn render_table(&self, table: &TableDefinition, columns: &[MappedColumn]) -> Result<Rendered> {
        let (statements, mut warnings) = ddl::render_create_table(table, columns, &self.target_schema)?;
        let mut all: Vec<String> = columns.iter().filter_map(|c| c.warning.clone()).collect();
        all.append(&mut warnings);
        Ok(Rendered {
            statements,
            warnings: all,
        })
    }

    /// Build the full creation plan for `catalog`.
    pub fn plan(&self, catalog: &Catalog) -> ConversionPlan {
        let mut plan = ConversionPlan::default();

        // Tables whose columns or DDL cannot be converted are left out first,
        // so they never take part in ordering.
        let mut rendered: Vec<(&TableDefinition, Vec<MappedColumn>, Rendered)> = Vec::new();
        for table in &catalog.tables {
            let result = self
                .map_table(table)
                .and_then(|cols| self.render_table(table, &cols).map(|r| (cols, r)));
            match result {
                Ok((cols, r)) => rendered.push((table, cols, r)),
                Err(e) => {
                    warn!("Excluding table {}: {}", table.qualified_name(), e);
                    plan.excluded.push(ExcludedObject {
                        kind: ObjectKind::Table,
                        name: table.qualified_name(),
                        reason: e.to_string(),
                        source_definition: None,
                    });
                }
            }
        }

        let tables: Vec<&TableDefinition> = rendered.iter().map(|(t, _, _)| *t).collect();
        let order = topological_order(&tables);
        let planned: HashSet<String> = tables.iter().map(|t| t.qualified_name()).collect();
        let excluded_tables: HashSet<String> =
            plan.excluded.iter().map(|e| e.name.clone()).collect();

        let mut placed: HashSet<String> = HashSet::new();
        let mut deferred: Vec<PlanItem> = Vec::new();

        let mut slots: Vec<Option<(&TableDefinition, Vec<MappedColumn>, Rendered)>> =
            rendered.into_iter().map(Some).collect();
        for idx in order {
            let Some((table, columns, body)) = slots[idx].take() else {
                continue;
            };
            let name = table.qualified_name();
            let depends_on: Vec<String> = table
                .referenced_tables()
                .into_iter()
                .filter(|r| planned.contains(r))
                .collect();

            plan.items
                .push(PlanItem::new(ObjectKind::Table, &name, body).on_table(&name));
            placed.insert(name.clone());

            if self.options.foreign_keys {
                for fk in &table.foreign_keys {
                    let parent = fk.referenced_table();
                    let fk_name = format!("{}.{}", name, fk.name);
                    if excluded_tables.contains(&parent) {
                        plan.excluded.push(ExcludedObject {
                            kind: ObjectKind::ForeignKey,
                            name: fk_name,
                            reason: format!("referenced table {} was excluded", parent),
                            source_definition: None,
                        });
                        continue;
                    }
                    let item = match self.render_ddl(SourceObject::ForeignKey(table, fk)) {
                        Ok(r) => PlanItem::new(ObjectKind::ForeignKey, fk_name, r).on_table(&name),
                        Err(e) => {
                            plan.excluded.push(ExcludedObject {
                                kind: ObjectKind::ForeignKey,
                                name: fk_name,
                                reason: e.to_string(),
                                source_definition: None,
                            });
                            continue;
                        }
                    };
                    if placed.contains(&parent) {
                        plan.items.push(item);
                    } else if planned.contains(&parent) {
                        debug!("Deferring {} until {} exists", item.name, parent);
                        deferred.push(item);
                    } else {
                        let mut item = item;
                        item.warnings.push(format!(
                            "foreign key {} references {}, which is not part of this migration",
                            fk.name, parent
                        ));
                        deferred.push(item);
                    }
                }
            }

            plan.tables.push(TableMapping {
                source: table.clone(),
                target_schema: self.target_schema.clone(),
                columns,
                depends_on,
            });
        }
        plan.items.append(&mut deferred);

        if self.options.indexes {
            for mapping in &plan.tables {
                let table = &mapping.source;
                for index in &table.indexes {
                    let name = format!("{}.{}", table.qualified_name(), index.name);
                    match self.render_ddl(SourceObject::Index(table, index)) {
                        Ok(r) => plan.items.push(
                            PlanItem::new(ObjectKind::Index, name, r).on_table(table.qualified_name()),
                        ),
                        Err(e) => plan.excluded.push(ExcludedObject {
                            kind: ObjectKind::Index,
                            name,
                            reason: e.to_string(),
                            source_definition: None,
                        }),
                    }
                }
            }
        }

        if self.options.sequences {
            for seq in &catalog.sequences {
                match self.render_ddl(SourceObject::Sequence(seq)) {
                    Ok(r) => plan
                        .items
                        .push(PlanItem::new(ObjectKind::Sequence, seq.qualified_name(), r)),
                    Err(e) => plan.excluded.push(ExcludedObject {
                        kind: ObjectKind::Sequence,
                        name: seq.qualified_name(),
                        reason: e.to_string(),
                        source_definition: None,
                    }),
                }
            }
        }

        if self.options.views {
            self.plan_views(catalog, &planned, &mut plan);
        }

        if self.options.procedures {
            for routine in &catalog.procedures {
                let kind = ObjectKind::Procedure;
                match self.render_ddl(SourceObject::Procedure(routine)) {
                    Ok(r) if !r.statements.is_empty() => plan.items.push(
                        PlanItem::new(kind, routine.qualified_name(), r)
                            .with_source(&routine.definition),
                    ),
                    Ok(r) => plan.excluded.push(ExcludedObject {
                        kind,
                        name: routine.qualified_name(),
                        reason: r.warnings.join("; "),
                        source_definition: Some(routine.definition.clone()),
                    }),
                    Err(e) => plan.excluded.push(ExcludedObject {
                        kind,
                        name: routine.qualified_name(),
                        reason: e.to_string(),
                        source_definition: Some(routine.definition.clone()),
                    }),
                }
            }
        }

        if self.options.triggers {
            for trigger in &catalog.triggers {
                let kind = ObjectKind::Trigger;
                let excluded = |reason: String| ExcludedObject {
                    kind,
                    name: trigger.qualified_name(),
                    reason,
                    source_definition: Some(trigger.definition.clone()),
                };
                if !planned.contains(&trigger.table) {
                    plan.excluded.push(excluded(format!(
                        "owning table {} is not part of this migration",
                        trigger.table
                    )));
                    continue;
                }
                match self.render_ddl(SourceObject::Trigger(trigger)) {
                    Ok(r) if !r.statements.is_empty() => plan.items.push(
                        PlanItem::new(kind, trigger.qualified_name(), r)
                            .on_table(&trigger.table)
                            .with_source(&trigger.definition),
                    ),
                    Ok(r) => plan.excluded.push(excluded(r.warnings.join("; "))),
                    Err(e) => plan.excluded.push(excluded(e.to_string())),
                }
            }
        }

        for mapping in &plan.tables {
            let table = &mapping.source;
            if !table.has_identity() {
                continue;
            }
            match self.render_ddl(SourceObject::IdentitySync(table)) {
                Ok(r) => plan.items.push(
                    PlanItem::new(ObjectKind::IdentitySync, table.qualified_name(), r)
                        .on_table(table.qualified_name()),
                ),
                Err(e) => plan.warnings.push(format!(
                    "identity re-sync for {} skipped: {}",
                    table.qualified_name(),
                    e
                )),
            }
        }

        info!(
            "Planned {} tables, {} DDL items ({} excluded, {} warnings)",
            plan.tables.len(),
            plan.items.len(),
            plan.excluded.len(),
            plan.warning_count()
        );
        plan
    }

    /// Order views after the tables and views they read from. Views with an
    /// unknown or excluded reference, or in a reference cycle, are excluded.
    fn plan_views(&self, catalog: &Catalog, planned: &HashSet<String>, plan: &mut ConversionPlan) {
        let views = &catalog.views;
        let index: HashMap<String, usize> = views
            .iter()
            .enumerate()
            .map(|(i, v)| (v.qualified_name(), i))
            .collect();

        let mut unresolved: HashMap<usize, String> = HashMap::new();
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); views.len()];
        for (i, view) in views.iter().enumerate() {
            for reference in &view.references {
                if planned.contains(reference) {
                    continue;
                }
                match index.get(reference) {
                    Some(&j) if j != i => {
                        if !parents[i].contains(&j) {
                            parents[i].push(j);
                        }
                    }
                    Some(_) => {}
                    None => {
                        unresolved
                            .entry(i)
                            .or_insert_with(|| format!("unresolved reference to {}", reference));
                    }
                }
            }
        }

        let KahnOrder { mut sorted, cyclic } = kahn(views.len(), &parents);
        for i in cyclic {
            unresolved
                .entry(i)
                .or_insert_with(|| "circular view dependency".to_string());
        }

        // Views built on an excluded view are excluded too.
        sorted.retain(|&i| {
            if let Some(bad) = parents[i].iter().find(|p| unresolved.contains_key(p)) {
                let reason = format!("depends on excluded view {}", views[*bad].qualified_name());
                unresolved.entry(i).or_insert(reason);
            }
            !unresolved.contains_key(&i)
        });

        for i in sorted {
            let view = &views[i];
            match self.render_ddl(SourceObject::View(view)) {
                Ok(r) => plan.items.push(
                    PlanItem::new(ObjectKind::View, view.qualified_name(), r)
                        .with_source(&view.definition),
                ),
                Err(e) => {
                    unresolved.insert(i, e.to_string());
                }
            }
        }

        let mut excluded: Vec<(usize, String)> = unresolved.into_iter().collect();
        excluded.sort_by_key(|(i, _)| *i);
        for (i, reason) in excluded {
            let view = &views[i];
            warn!("Excluding view {}: {}", view.qualified_name(), reason);
            plan.excluded.push(ExcludedObject {
                kind: ObjectKind::View,
                name: view.qualified_name(),
                reason,
                source_definition: Some(view.definition.clone()),
            });
        }
    }
}

struct KahnOrder {
    sorted: Vec<usize>,
    cyclic: Vec<usize>,
}

/// Kahn's algorithm over `parents[i]` (nodes `i` depends on). The ready set
/// is always drained lowest index first, so ties keep discovery order.
fn kahn(n: usize, parents: &[Vec<usize>]) -> KahnOrder {
    let mut pending: Vec<usize> = parents.iter().map(|p| p.len()).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (child, ps) in parents.iter().enumerate() {
        for &p in ps {
            children[p].push(child);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
    let mut sorted = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        sorted.push(next);
        for &child in &children[next] {
            pending[child] -= 1;
            if pending[child] == 0 {
                ready.insert(child);
            }
        }
    }

    let done: HashSet<usize> = sorted.iter().copied().collect();
    let cyclic = (0..n).filter(|i| !done.contains(i)).collect();
    KahnOrder { sorted, cyclic }
}

/// Table creation order: parents before children, tables caught in FK cycles
/// appended in discovery order.
fn topological_order(tables: &[&TableDefinition]) -> Vec<usize> {
    let index: HashMap<String, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.qualified_name(), i))
        .collect();
    let parents: Vec<Vec<usize>> = tables
        .iter()
        .map(|t| {
            t.referenced_tables()
                .iter()
                .filter_map(|r| index.get(r).copied())
                .collect()
        })
        .collect();

    let KahnOrder { mut sorted, cyclic } = kahn(tables.len(), &parents);
    if !cyclic.is_empty() {
        warn!(
            "Foreign key cycle among {} table(s); their constraints are deferred",
            cyclic.len()
        );
    }
    sorted.extend(cyclic);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnDefinition;

    fn table(name: &str, parents: &[&str]) -> TableDefinition {
        let mut t = TableDefinition::new("APP", name);
        t.columns = vec![
            ColumnDefinition::new("ID", "INTEGER", 1).not_null(),
            ColumnDefinition::new("PARENT_ID", "INTEGER", 2),
        ];
        t.primary_key = vec!["ID".into()];
        for parent in parents {
            t.foreign_keys.push(ForeignKey {
                name: format!("FK_{}_{}", name, parent),
                columns: vec!["PARENT_ID".into()],
                ref_schema: "APP".into(),
                ref_table: (*parent).into(),
                ref_columns: vec!["ID".into()],
                on_delete: "A".into(),
                on_update: "A".into(),
            });
        }
        t
    }

    fn converter() -> SchemaConverter {
        SchemaConverter::new(TypeMapper::new(), "APP", "public")
    }

    fn position(plan: &ConversionPlan, kind: ObjectKind, name: &str) -> usize {
        plan.items
            .iter()
            .position(|i| i.kind == kind && i.name == name)
            .unwrap_or_else(|| panic!("{} {} not planned", kind, name))
    }

    fn view(name: &str, refs: &[&str]) -> ViewDefinition {
        ViewDefinition {
            schema: "APP".into(),
            name: name.into(),
            definition: format!("CREATE VIEW APP.{} AS SELECT 1 AS X FROM SYSIBM.SYSDUMMY1", name),
            references: refs.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_parent_created_before_child_and_fk_after_both() {
        let catalog = Catalog {
            tables: vec![table("CHILD", &["PARENT"]), table("PARENT", &[])],
            ..Default::default()
        };
        let plan = converter().plan(&catalog);

        assert_eq!(plan.table_names(), vec!["APP.PARENT", "APP.CHILD"]);
        let parent = position(&plan, ObjectKind::Table, "APP.PARENT");
        let child = position(&plan, ObjectKind::Table, "APP.CHILD");
        let fk = position(&plan, ObjectKind::ForeignKey, "APP.CHILD.FK_CHILD_PARENT");
        assert!(parent < child);
        assert!(child < fk);
        assert!(plan.items[fk].statements[0].contains("REFERENCES \"public\".\"PARENT\""));
        assert_eq!(plan.table("APP.CHILD").unwrap().depends_on, vec!["APP.PARENT"]);
    }

    #[test]
    fn test_independent_tables_keep_discovery_order() {
        let catalog = Catalog {
            tables: vec![table("B", &[]), table("A", &[]), table("C", &["A"])],
            ..Default::default()
        };
        let plan = converter().plan(&catalog);
        assert_eq!(plan.table_names(), vec!["APP.B", "APP.A", "APP.C"]);
    }

    #[test]
    fn test_cycle_defers_constraints_after_all_bodies() {
        let catalog = Catalog {
            tables: vec![table("A", &["B"]), table("B", &["A"]), table("C", &[])],
            ..Default::default()
        };
        let plan = converter().plan(&catalog);
        assert_eq!(plan.table_names(), vec!["APP.C", "APP.A", "APP.B"]);

        let last_body = position(&plan, ObjectKind::Table, "APP.B");
        assert!(position(&plan, ObjectKind::ForeignKey, "APP.A.FK_A_B") > last_body);
        assert!(position(&plan, ObjectKind::ForeignKey, "APP.B.FK_B_A") > last_body);
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        let catalog = Catalog {
            tables: vec![table("NODE", &["NODE"])],
            ..Default::default()
        };
        let plan = converter().plan(&catalog);
        assert_eq!(plan.tables.len(), 1);
        assert!(plan.tables[0].depends_on.is_empty());
        position(&plan, ObjectKind::ForeignKey, "APP.NODE.FK_NODE_NODE");
    }

    #[test]
    fn test_fk_outside_batch_is_deferred_with_warning() {
        let catalog = Catalog {
            tables: vec![table("CHILD", &["ELSEWHERE"])],
            ..Default::default()
        };
        let plan = converter().plan(&catalog);
        let fk = &plan.items[position(&plan, ObjectKind::ForeignKey, "APP.CHILD.FK_CHILD_ELSEWHERE")];
        assert_eq!(fk.warnings.len(), 1);
        assert!(fk.warnings[0].contains("APP.ELSEWHERE"));
    }

    #[test]
    fn test_unsupported_type_excludes_table_and_its_fks() {
        let mut bad = table("PARENT", &[]);
        bad.columns.push(ColumnDefinition::new("LOC", "ST_POINT", 3));
        let catalog = Catalog {
            tables: vec![bad, table("CHILD", &["PARENT"])],
            ..Default::default()
        };
        let plan = converter().plan(&catalog);

        assert_eq!(plan.table_names(), vec!["APP.CHILD"]);
        let excluded_table = plan
            .excluded
            .iter()
            .find(|e| e.kind == ObjectKind::Table)
            .unwrap();
        assert_eq!(excluded_table.name, "APP.PARENT");
        assert!(excluded_table.reason.contains("ST_POINT"));
        assert!(plan
            .excluded
            .iter()
            .any(|e| e.kind == ObjectKind::ForeignKey && e.name == "APP.CHILD.FK_CHILD_PARENT"));
    }

    #[test]
    fn test_fallback_keeps_table_with_warning() {
        let mut t = table("GEO", &[]);
        t.columns.push(ColumnDefinition::new("LOC", "ST_POINT", 3));
        let converter = SchemaConverter::new(
            TypeMapper::new().with_fallback(Some("TEXT".into())),
            "APP",
            "public",
        );
        let plan = converter.plan(&Catalog {
            tables: vec![t],
            ..Default::default()
        });
        assert!(plan.excluded.is_empty());
        assert_eq!(plan.tables[0].columns[2].target_type, "TEXT");
        assert!(!plan.items[0].warnings.is_empty());
    }

    #[test]
    fn test_object_kinds_follow_tables() {
        let mut t = table("ORDERS", &[]);
        t.columns[0] = ColumnDefinition::new("ID", "INTEGER", 1).identity();
        t.indexes.push(IndexDefinition {
            name: "IX_PARENT".into(),
            columns: vec!["PARENT_ID".into()],
            descending: Vec::new(),
            is_unique: false,
        });
        let catalog = Catalog {
            tables: vec![t],
            sequences: vec![SequenceDefinition {
                schema: "APP".into(),
                name: "S".into(),
                start: 1,
                increment: 1,
                min_value: None,
                max_value: None,
                cycle: false,
                cache: None,
                next_value: None,
            }],
            views: vec![view("V", &["APP.ORDERS"])],
            procedures: vec![ProcedureDefinition {
                schema: "APP".into(),
                name: "P".into(),
                kind: crate::core::RoutineKind::Procedure,
                definition: "CREATE PROCEDURE APP.P () LANGUAGE SQL BEGIN END".into(),
                parameters: Vec::new(),
            }],
            triggers: Vec::new(),
        };
        let plan = converter().plan(&catalog);
        let kinds: Vec<ObjectKind> = plan.items.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::Table,
                ObjectKind::Index,
                ObjectKind::Sequence,
                ObjectKind::View,
                ObjectKind::Procedure,
                ObjectKind::IdentitySync,
            ]
        );
        let before: Vec<ObjectKind> = plan.items_before_data().map(|i| i.kind).collect();
        assert_eq!(
            before,
            vec![ObjectKind::Table, ObjectKind::Sequence, ObjectKind::View, ObjectKind::Procedure]
        );
    }

    #[test]
    fn test_views_ordered_and_unresolved_excluded() {
        let catalog = Catalog {
            tables: vec![table("T", &[])],
            views: vec![
                view("V_TOP", &["APP.V_BASE"]),
                view("V_BASE", &["APP.T"]),
                view("V_MISSING", &["APP.NOPE"]),
                view("V_ON_MISSING", &["APP.V_MISSING"]),
                view("V_LOOP_A", &["APP.V_LOOP_B"]),
                view("V_LOOP_B", &["APP.V_LOOP_A"]),
            ],
            ..Default::default()
        };
        let plan = converter().plan(&catalog);

        let views: Vec<&str> = plan
            .items
            .iter()
            .filter(|i| i.kind == ObjectKind::View)
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(views, vec!["APP.V_BASE", "APP.V_TOP"]);

        let excluded: Vec<&str> = plan.excluded.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            excluded,
            vec!["APP.V_MISSING", "APP.V_ON_MISSING", "APP.V_LOOP_A", "APP.V_LOOP_B"]
        );
        assert!(plan.excluded.iter().all(|e| e.source_definition.is_some()));
    }

    #[test]
    fn test_trigger_on_unplanned_table_excluded() {
        let catalog = Catalog {
            tables: vec![table("T", &[])],
            triggers: vec![TriggerDefinition {
                schema: "APP".into(),
                name: "TRG".into(),
                table: "APP.OTHER".into(),
                definition: "CREATE TRIGGER APP.TRG AFTER INSERT ON APP.OTHER FOR EACH ROW BEGIN ATOMIC END".into(),
            }],
            ..Default::default()
        };
        let plan = converter().plan(&catalog);
        assert_eq!(plan.excluded.len(), 1);
        assert_eq!(plan.excluded[0].kind, ObjectKind::Trigger);
    }

    #[test]
    fn test_options_skip_kinds() {
        let mut t = table("CHILD", &["PARENT"]);
        t.indexes.push(IndexDefinition {
            name: "IX".into(),
            columns: vec!["PARENT_ID".into()],
            descending: Vec::new(),
            is_unique: true,
        });
        let catalog = Catalog {
            tables: vec![table("PARENT", &[]), t],
            ..Default::default()
        };
        let converter = converter().with_options(PlanOptions {
            foreign_keys: false,
            indexes: false,
            ..PlanOptions::default()
        });
        let plan = converter.plan(&catalog);
        assert!(plan.items.iter().all(|i| i.kind == ObjectKind::Table));
        // Ordering still honors the FK edge.
        assert_eq!(plan.table_names(), vec!["APP.PARENT", "APP.CHILD"]);
    }

    #[test]
    fn test_dependents_of_is_transitive() {
        let catalog = Catalog {
            tables: vec![
                table("A", &[]),
                table("B", &["A"]),
                table("C", &["B"]),
                table("D", &[]),
            ],
            ..Default::default()
        };
        let plan = converter().plan(&catalog);
        let mut blocked = plan.dependents_of("APP.A");
        blocked.sort();
        assert_eq!(blocked, vec!["APP.B", "APP.C"]);
    }

    #[test]
    fn test_render_ddl_table() {
        let rendered = converter()
            .render_ddl(SourceObject::Table(&table("T", &[])))
            .unwrap();
        assert!(rendered.statements[0].starts_with("CREATE TABLE \"public\".\"T\""));
        assert!(!rendered.needs_review());
    }

    #[test]
    fn test_plan_item_key() {
        let item = PlanItem::new(ObjectKind::ForeignKey, "APP.C.FK", Rendered::default());
        assert_eq!(item.key(), "foreign_key:APP.C.FK");
    }
}
