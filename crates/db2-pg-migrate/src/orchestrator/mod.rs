//! Migration orchestrator - main workflow coordinator.
//!
//! Runs the phases of the configured mode in order:
//!
//! 1. Extract: read the source catalog and apply the table filters
//! 2. Convert: build the ordered conversion plan
//! 3. CreateSchema: run the plan's DDL on the target
//! 4. TransferData: move table data, then apply post-load objects
//! 5. Validate: compare source and target
//!
//! Extract and Convert are recomputed on every run; their products are
//! deterministic and held in memory. Everything after that is recorded in
//! the checkpoint so an interrupted run resumes where it stopped.

mod summary;

pub use summary::{MigrationSummary, Phase, PhaseOutcome, PhaseReport, RunStatus};

use chrono::Utc;
use glob::{MatchOptions, Pattern};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, MigrationMode};
use crate::core::identifier::quote_ident;
use crate::core::{Catalog, SourceDatabase, TargetDatabase};
use crate::drivers::{Db2Source, PgTarget};
use crate::error::{MigrateError, Result};
use crate::progress::{ProgressReporter, ProgressUpdate};
use crate::schema::{
    write_manual_review, ConversionPlan, ExcludedObject, ObjectKind, PlanItem, SchemaConverter,
    TableMapping,
};
use crate::state::{ProgressTracker, SharedTracker};
use crate::transfer::{TransferConfig, TransferEngine};
use crate::validate::{compare_columns, ValidationReport, Validator};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceDatabase>,
    target: Arc<dyn TargetDatabase>,
    resume: bool,
    cancel: CancellationToken,
    progress: Arc<ProgressReporter>,
}

/// Mutable bookkeeping of one run.
#[derive(Default)]
struct RunRecord {
    phases: Vec<PhaseReport>,
    excluded: Vec<ExcludedObject>,
    succeeded: usize,
    warned: usize,
    tables_total: usize,

    /// Tables that cannot receive data because their DDL failed.
    blocked: HashSet<String>,

    /// Tables whose transfer did not finish in this run.
    incomplete: HashSet<String>,
    validation: Option<ValidationReport>,
}

impl RunRecord {
    fn record(&mut self, phase: Phase, outcome: PhaseOutcome, started: Instant) {
        let duration_seconds = started.elapsed().as_secs_f64();
        match &outcome {
            PhaseOutcome::Failure(cause) => error!("Phase {} failed: {}", phase, cause),
            PhaseOutcome::Partial(notes) => {
                warn!("Phase {} finished with {} issue(s)", phase, notes.len())
            }
            PhaseOutcome::Skipped => info!("Phase {} skipped (already complete)", phase),
            PhaseOutcome::Success => info!("Phase {} finished in {:.1}s", phase, duration_seconds),
        }
        self.phases.push(PhaseReport {
            phase,
            outcome,
            duration_seconds,
        });
    }
}

fn outcome_of(failures: Vec<String>) -> PhaseOutcome {
    if failures.is_empty() {
        PhaseOutcome::Success
    } else {
        PhaseOutcome::Partial(failures)
    }
}

impl Orchestrator {
    /// Create an orchestrator over already-connected databases.
    pub fn new(
        config: Config,
        source: Arc<dyn SourceDatabase>,
        target: Arc<dyn TargetDatabase>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            resume: false,
            cancel: CancellationToken::new(),
            progress: Arc::new(ProgressReporter::new()),
        }
    }

    /// Connect to DB2 and PostgreSQL using the configuration.
    pub async fn connect(config: Config) -> Result<Self> {
        let source = Db2Source::connect(&config.source).await?;
        let max_conns = config.target.get_max_connections(config.migration.workers);
        let target = PgTarget::connect(&config.target, max_conns).await?;
        Ok(Self::new(config, Arc::new(source), Arc::new(target)))
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Forward progress events to `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress = Arc::new(ProgressReporter::new().with_progress(tx));
        self
    }

    /// Continue from the existing checkpoint instead of refusing to start.
    pub fn resume(mut self) -> Self {
        self.resume = true;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the migration. Always returns a summary; check
    /// [`MigrationSummary::exit_code`] for the outcome.
    pub async fn run(self) -> MigrationSummary {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mode = self.config.migration.mode;
        info!("Starting migration run {} (mode: {})", run_id, mode);

        let mut run = RunRecord::default();
        let (result, tracker) = match ProgressTracker::create(
            &self.config.checkpoint.file,
            mode,
            &self.config.hash(),
            self.resume,
        ) {
            Ok(tracker) => {
                let tracker = tracker.into_shared();
                let result = self.execute(&tracker, &mut run).await;
                (result, Some(tracker))
            }
            Err(e) => (Err(e), None),
        };

        self.progress.finish();
        self.summarize(run_id, started_at, run, result, tracker)
            .await
    }

    /// Extract, convert and validate without touching the checkpoint.
    pub async fn validate_only(&self) -> Result<ValidationReport> {
        let catalog = self.extract().await?;
        let plan = self.converter().plan(&catalog);
        let validator = self.validator();
        let report = if self.config.migration.mode == MigrationMode::SchemaOnly {
            validator.validate_schema_only(&plan.tables).await
        } else {
            validator
                .validate(&plan.tables, self.config.validation.sample_size)
                .await
        };
        if let Some(path) = &self.config.validation.report_file {
            report.write_to(path)?;
        }
        Ok(report)
    }

    async fn execute(&self, tracker: &SharedTracker, run: &mut RunRecord) -> Result<()> {
        let mode = self.config.migration.mode;
        let phases = Phase::for_mode(mode);

        // Extract and Convert
        let plan = if phases.contains(&Phase::Extract) {
            let started = self.start_phase(Phase::Extract)?;
            let catalog = match self.extract().await {
                Ok(catalog) => {
                    run.record(Phase::Extract, PhaseOutcome::Success, started);
                    catalog
                }
                Err(e) => {
                    run.record(Phase::Extract, PhaseOutcome::Failure(e.to_string()), started);
                    return Err(e);
                }
            };

            let started = self.start_phase(Phase::Convert)?;
            let (plan, outcome) = self.convert(&catalog, run);
            let failed = outcome.is_failure();
            run.record(Phase::Convert, outcome, started);
            if failed {
                return Err(self.excluded_table_error(&plan));
            }
            plan
        } else {
            info!("Reading source catalog for a data-only run");
            let catalog = self.extract().await?;
            let (plan, outcome) = self.convert(&catalog, run);
            if outcome.is_failure() {
                return Err(self.excluded_table_error(&plan));
            }
            plan
        };
        run.tables_total = plan.tables.len();

        // CreateSchema
        if phases.contains(&Phase::CreateSchema) {
            let started = self.start_phase(Phase::CreateSchema)?;
            let include_post_load = mode == MigrationMode::SchemaOnly;
            match self.create_schema(&plan, tracker, run, include_post_load).await {
                Ok(outcome) => run.record(Phase::CreateSchema, outcome, started),
                Err(e) => {
                    run.record(Phase::CreateSchema, PhaseOutcome::Failure(e.to_string()), started);
                    return Err(e);
                }
            }
        }

        // TransferData
        if phases.contains(&Phase::TransferData) {
            let started = self.start_phase(Phase::TransferData)?;
            let result = if mode == MigrationMode::DataOnly {
                match self.pre_validate(&plan).await {
                    Ok(()) => self.transfer_data(&plan, tracker, run, false).await,
                    Err(e) => Err(e),
                }
            } else {
                self.transfer_data(&plan, tracker, run, true).await
            };
            match result {
                Ok(outcome) => run.record(Phase::TransferData, outcome, started),
                Err(e) => {
                    run.record(Phase::TransferData, PhaseOutcome::Failure(e.to_string()), started);
                    return Err(e);
                }
            }
        }

        // Validate
        if phases.contains(&Phase::Validate) {
            let started = self.start_phase(Phase::Validate)?;
            if !self.config.validation.enabled {
                info!("Validation disabled in configuration");
                run.record(Phase::Validate, PhaseOutcome::Skipped, started);
                return Ok(());
            }
            let report = self.validate(&plan, run).await;
            let outcome = if report.is_success() {
                PhaseOutcome::Success
            } else {
                PhaseOutcome::Failure(format!("{} table(s) failed validation", report.failed))
            };
            run.record(Phase::Validate, outcome, started);
            run.validation = Some(report);
        }

        Ok(())
    }

    fn start_phase(&self, phase: Phase) -> Result<Instant> {
        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        self.progress.phase_started(phase);
        Ok(Instant::now())
    }

    fn converter(&self) -> SchemaConverter {
        SchemaConverter::from_config(&self.config)
    }

    fn validator(&self) -> Validator {
        Validator::new(
            self.source.clone(),
            self.target.clone(),
            self.config.validation.clone(),
        )
        .with_progress(self.progress.clone())
    }

    async fn extract(&self) -> Result<Catalog> {
        let schema = self.config.source.effective_schema();
        let mut catalog = self.source.extract_catalog(&schema).await?;
        let found = catalog.tables.len();
        self.filter_tables(&mut catalog);
        info!(
            "Extracted {} objects from {} ({} of {} tables selected)",
            catalog.object_count(),
            schema,
            catalog.tables.len(),
            found
        );
        Ok(catalog)
    }

    /// Apply `include_tables` / `exclude_tables`. Patterns match the bare or
    /// qualified table name, case-insensitively.
    fn filter_tables(&self, catalog: &mut Catalog) {
        let m = &self.config.migration;
        let compile = |patterns: &[String]| -> Vec<Pattern> {
            patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect()
        };
        let include = compile(&m.include_tables);
        let exclude = compile(&m.exclude_tables);
        if include.is_empty() && exclude.is_empty() {
            return;
        }

        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::default()
        };
        catalog.tables.retain(|table| {
            let qualified = table.qualified_name();
            let matches = |p: &Pattern| {
                p.matches_with(&table.name, options) || p.matches_with(&qualified, options)
            };
            let selected = (include.is_empty() || include.iter().any(matches))
                && !exclude.iter().any(matches);
            if !selected {
                debug!("Table {} filtered out", qualified);
            }
            selected
        });
    }

    /// Build the plan and report what was left out. Fails only when a table
    /// was excluded and `continue_on_error` is off.
    fn convert(&self, catalog: &Catalog, run: &mut RunRecord) -> (ConversionPlan, PhaseOutcome) {
        let plan = self.converter().plan(catalog);

        let mut notes = plan.warnings.clone();
        for excluded in &plan.excluded {
            warn!("Excluded {} {}: {}", excluded.kind, excluded.name, excluded.reason);
            notes.push(format!(
                "{} {} excluded: {}",
                excluded.kind, excluded.name, excluded.reason
            ));
            if let Some(definition) = &excluded.source_definition {
                self.save_for_review(
                    &excluded.name,
                    definition,
                    &[],
                    std::slice::from_ref(&excluded.reason),
                );
            }
        }
        run.excluded = plan.excluded.clone();

        let table_excluded = plan.excluded.iter().any(|e| e.kind == ObjectKind::Table);
        let outcome = if table_excluded && !self.config.migration.continue_on_error {
            PhaseOutcome::Failure("tables excluded from the plan".to_string())
        } else {
            outcome_of(notes)
        };
        (plan, outcome)
    }

    fn excluded_table_error(&self, plan: &ConversionPlan) -> MigrateError {
        match plan.excluded.iter().find(|e| e.kind == ObjectKind::Table) {
            Some(e) => MigrateError::schema_creation(format!("table {}", e.name), &e.reason),
            None => MigrateError::schema_creation("plan", "tables excluded from the plan"),
        }
    }

    async fn create_schema(
        &self,
        plan: &ConversionPlan,
        tracker: &SharedTracker,
        run: &mut RunRecord,
        include_post_load: bool,
    ) -> Result<PhaseOutcome> {
        if tracker.lock().await.is_phase_completed(Phase::CreateSchema) {
            return Ok(PhaseOutcome::Skipped);
        }

        let schema = &self.config.target.schema;
        let statement = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)?);
        self.target
            .execute_ddl(&statement)
            .await
            .map_err(|e| MigrateError::schema_creation(format!("schema {}", schema), e.to_string()))?;

        let items: Vec<&PlanItem> = if include_post_load {
            plan.items.iter().collect()
        } else {
            plan.items_before_data().collect()
        };
        info!("Creating {} schema objects", items.len());
        let failures = self.apply_items(plan, &items, tracker, run).await?;

        if failures.is_empty() {
            let mut tracker = tracker.lock().await;
            tracker.mark_phase_completed(Phase::CreateSchema);
            tracker.persist()?;
        }
        Ok(outcome_of(failures))
    }

    /// Run each item's statements in order. Returns the failures of
    /// non-fatal objects; a table failure aborts unless `continue_on_error`.
    async fn apply_items(
        &self,
        plan: &ConversionPlan,
        items: &[&PlanItem],
        tracker: &SharedTracker,
        run: &mut RunRecord,
    ) -> Result<Vec<String>> {
        let mut failures = Vec::new();

        for item in items {
            if self.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let key = item.key();
            if tracker.lock().await.is_object_created(&key) {
                debug!("{} already created", key);
                run.succeeded += 1;
                continue;
            }

            if let Some(table) = item.table.as_ref().filter(|t| run.blocked.contains(*t)) {
                let message = format!("skipped: table {} was not created", table);
                warn!("{}: {}", key, message);
                let mut tracker = tracker.lock().await;
                tracker.mark_object_failed(&key, &message);
                tracker.persist()?;
                failures.push(format!("{}: {}", key, message));
                continue;
            }

            match self.execute_statements(&item.statements).await {
                Ok(()) => {
                    {
                        let mut tracker = tracker.lock().await;
                        tracker.mark_object_created(&key);
                        tracker.clear_failure(&key);
                        tracker.persist()?;
                    }
                    if item.warnings.is_empty() {
                        run.succeeded += 1;
                    } else {
                        run.warned += 1;
                        for warning in &item.warnings {
                            warn!("{}: {}", item.name, warning);
                        }
                    }
                    if item.needs_review() {
                        if let Some(definition) = &item.source_definition {
                            self.save_for_review(&item.name, definition, &item.statements, &item.warnings);
                        }
                    }
                }
                Err(e) => {
                    let err = MigrateError::schema_creation(
                        format!("{} {}", item.kind, item.name),
                        e.to_string(),
                    );
                    error!("{}", err);
                    {
                        let mut tracker = tracker.lock().await;
                        tracker.mark_object_failed(&key, &err.to_string());
                        tracker.persist()?;
                    }
                    failures.push(err.to_string());

                    if let Some(definition) = &item.source_definition {
                        let mut warnings = item.warnings.clone();
                        warnings.push(format!("target rejected the conversion: {}", e));
                        self.save_for_review(&item.name, definition, &item.statements, &warnings);
                    }

                    if item.kind.is_blocking() {
                        run.blocked.insert(item.name.clone());
                        for dependent in plan.dependents_of(&item.name) {
                            warn!("{} blocked by failure of {}", dependent, item.name);
                            run.blocked.insert(dependent);
                        }
                        if !self.config.migration.continue_on_error {
                            return Err(err);
                        }
                    }
                }
            }
        }

        Ok(failures)
    }

    async fn execute_statements(&self, statements: &[String]) -> Result<()> {
        for statement in statements {
            self.target.execute_ddl(statement).await?;
        }
        Ok(())
    }

    fn save_for_review(&self, name: &str, original: &str, attempted: &[String], warnings: &[String]) {
        let dir = &self.config.migration.manual_review_dir;
        match write_manual_review(dir, name, original, attempted, warnings) {
            Ok(path) => info!("{} needs manual review: {}", name, path.display()),
            Err(e) => warn!("Could not write manual review file for {}: {}", name, e),
        }
    }

    /// Confirm every table exists in the target with all its columns.
    async fn pre_validate(&self, plan: &ConversionPlan) -> Result<()> {
        let mut problems = Vec::new();
        for mapping in &plan.tables {
            let name = mapping.qualified_name();
            match self
                .target
                .describe_table(&mapping.target_schema, mapping.target_name())
                .await?
            {
                None => problems.push(format!(
                    "table {}.{} does not exist",
                    mapping.target_schema,
                    mapping.target_name()
                )),
                Some(observed) => {
                    for diff in compare_columns(mapping, &observed) {
                        if diff.is_failure() {
                            problems.push(format!("{}: {}", name, diff.detail));
                        } else {
                            warn!("{}: {}", name, diff.detail);
                        }
                    }
                }
            }
        }

        if problems.is_empty() {
            info!("Target schema pre-validation passed for {} tables", plan.tables.len());
            Ok(())
        } else {
            Err(MigrateError::PreValidation(problems.join("; ")))
        }
    }

    async fn transfer_data(
        &self,
        plan: &ConversionPlan,
        tracker: &SharedTracker,
        run: &mut RunRecord,
        apply_post_load: bool,
    ) -> Result<PhaseOutcome> {
        if tracker.lock().await.is_phase_completed(Phase::TransferData) {
            return Ok(PhaseOutcome::Skipped);
        }

        let tables: Vec<TableMapping> = plan
            .tables
            .iter()
            .filter(|t| !run.blocked.contains(&t.qualified_name()))
            .cloned()
            .collect();
        let mut failures = self.run_transfers(tables, tracker, run).await?;

        if apply_post_load {
            let items: Vec<&PlanItem> = plan
                .items_after_data()
                .filter(|item| match &item.table {
                    Some(table) if run.incomplete.contains(table) => {
                        info!("{} deferred until {} is fully loaded", item.key(), table);
                        false
                    }
                    _ => true,
                })
                .collect();
            info!("Applying {} post-load objects", items.len());
            failures.extend(self.apply_items(plan, &items, tracker, run).await?);
        }

        if failures.is_empty() {
            let mut tracker = tracker.lock().await;
            tracker.mark_phase_completed(Phase::TransferData);
            tracker.persist()?;
        }
        Ok(outcome_of(failures))
    }

    /// Transfer tables with up to `workers` concurrent tasks. A table starts
    /// only when none of its in-batch parents is still pending or running;
    /// when only cyclic tables remain, the first is started anyway.
    async fn run_transfers(
        &self,
        tables: Vec<TableMapping>,
        tracker: &SharedTracker,
        run: &mut RunRecord,
    ) -> Result<Vec<String>> {
        let workers = self.config.migration.workers.max(1);
        let continue_on_error = self.config.migration.continue_on_error;
        let cancel = self.cancel.child_token();
        let engine = Arc::new(
            TransferEngine::new(
                self.source.clone(),
                self.target.clone(),
                tracker.clone(),
                TransferConfig {
                    batch_size: self.config.migration.batch_size,
                    ..TransferConfig::default()
                },
            )
            .with_progress(self.progress.clone())
            .with_cancel(cancel.clone()),
        );

        info!("Transferring {} tables with {} workers", tables.len(), workers);

        let mut pending = tables;
        let mut running: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut failures = Vec::new();
        let mut abort: Option<MigrateError> = None;
        let mut set: JoinSet<(String, Result<crate::transfer::TransferResult>)> = JoinSet::new();

        loop {
            while abort.is_none() && !cancel.is_cancelled() && set.len() < workers {
                let Some(idx) = next_eligible(&pending, &running, set.is_empty()) else {
                    break;
                };
                let mapping = pending.remove(idx);
                let name = mapping.qualified_name();

                if let Some(parent) = mapping.depends_on.iter().find(|p| failed.contains(*p)) {
                    let message = format!("skipped: parent table {} failed", parent);
                    warn!("{}: {}", name, message);
                    {
                        let mut tracker = tracker.lock().await;
                        tracker.mark_object_failed(&name, &message);
                        tracker.persist()?;
                    }
                    failures.push(format!("{}: {}", name, message));
                    run.incomplete.insert(name.clone());
                    failed.insert(name);
                    continue;
                }

                running.insert(name.clone());
                let engine = engine.clone();
                let tracker = tracker.clone();
                set.spawn(async move {
                    let offset = tracker.lock().await.resume_offset(&name);
                    let result = engine.transfer_table(&mapping, offset).await;
                    (name, result)
                });
            }

            let Some(joined) = set.join_next().await else {
                break;
            };
            let (name, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Transfer task failed: {}", e);
                    abort.get_or_insert(MigrateError::Source(format!("transfer task failed: {}", e)));
                    cancel.cancel();
                    continue;
                }
            };
            running.remove(&name);

            match result {
                Ok(r) => {
                    if r.already_complete {
                        debug!("{}: completed in an earlier run", name);
                    } else {
                        info!(
                            "{}: {} rows in {} batches ({:.0} rows/s)",
                            name, r.rows_transferred, r.batches, r.rows_per_second
                        );
                    }
                    run.succeeded += 1;
                }
                Err(MigrateError::Cancelled) => {
                    run.incomplete.insert(name);
                }
                Err(e) => {
                    error!("{}: {}", name, e);
                    failures.push(e.to_string());
                    run.incomplete.insert(name.clone());
                    failed.insert(name);
                    if e.is_fatal() || !continue_on_error {
                        abort.get_or_insert(e);
                        cancel.cancel();
                    }
                }
            }
        }

        run.incomplete.extend(pending.iter().map(|t| t.qualified_name()));
        if let Some(e) = abort {
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        Ok(failures)
    }

    async fn validate(&self, plan: &ConversionPlan, run: &RunRecord) -> ValidationReport {
        let tables: Vec<TableMapping> = plan
            .tables
            .iter()
            .filter(|t| !run.blocked.contains(&t.qualified_name()))
            .cloned()
            .collect();

        let validator = self.validator();
        let report = if self.config.migration.mode == MigrationMode::SchemaOnly {
            validator.validate_schema_only(&tables).await
        } else {
            validator
                .validate(&tables, self.config.validation.sample_size)
                .await
        };

        info!("\n{}", report.to_text());
        if let Some(path) = &self.config.validation.report_file {
            match report.write_to(path) {
                Ok(()) => info!("Validation report written to {}", path.display()),
                Err(e) => warn!("Could not write validation report: {}", e),
            }
        }
        report
    }

    async fn summarize(
        &self,
        run_id: String,
        started_at: chrono::DateTime<Utc>,
        run: RunRecord,
        result: Result<()>,
        tracker: Option<SharedTracker>,
    ) -> MigrationSummary {
        let mut failed_objects: BTreeMap<String, String> = BTreeMap::new();
        let mut tables_completed = 0;
        if let Some(tracker) = &tracker {
            let tracker = tracker.lock().await;
            failed_objects.extend(tracker.failed_objects().clone());
            tables_completed = tracker.checkpoint().completed_tables.len();
        }
        for excluded in &run.excluded {
            failed_objects.insert(
                format!("{}:{}", excluded.kind, excluded.name),
                format!("excluded: {}", excluded.reason),
            );
        }

        let validation_failed = run.validation.as_ref().is_some_and(|r| !r.is_success());
        let (status, exit_code, error) = match &result {
            Ok(()) if failed_objects.is_empty() && !validation_failed => (RunStatus::Completed, 0, None),
            Ok(()) if validation_failed => (RunStatus::CompletedWithErrors, 4, None),
            Ok(()) => (RunStatus::CompletedWithErrors, 1, None),
            Err(MigrateError::Cancelled) => (
                RunStatus::Cancelled,
                MigrateError::Cancelled.exit_code(),
                Some(MigrateError::Cancelled.to_string()),
            ),
            Err(e) => (RunStatus::Failed, e.exit_code(), Some(e.to_string())),
        };

        if status == RunStatus::Completed {
            if let Some(tracker) = tracker {
                match Arc::try_unwrap(tracker) {
                    Ok(tracker) => {
                        if let Err(e) = tracker.into_inner().finalize() {
                            warn!("Could not remove checkpoint: {}", e);
                        }
                    }
                    Err(_) => warn!("Checkpoint still in use, leaving it in place"),
                }
            }
        } else if tracker.is_some() {
            info!(
                "Checkpoint kept at {}; rerun with resume to continue",
                self.config.checkpoint.file.display()
            );
        }

        let completed_at = Utc::now();
        let summary = MigrationSummary {
            run_id,
            mode: self.config.migration.mode,
            status,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            phases: run.phases,
            objects_succeeded: run.succeeded,
            objects_warned: run.warned,
            objects_failed: failed_objects.len(),
            tables_total: run.tables_total,
            tables_completed,
            rows_transferred: self.progress.rows_transferred(),
            rows_per_second: self.progress.rows_per_second(),
            failed_objects,
            excluded_objects: run.excluded,
            validation: run.validation,
            error,
            exit_code,
        };

        match summary.status {
            RunStatus::Completed => info!(
                "Migration completed: {} objects, {} rows ({:.0} rows/s)",
                summary.objects_succeeded + summary.objects_warned,
                summary.rows_transferred,
                summary.rows_per_second
            ),
            _ => warn!(
                "Migration {}: {} succeeded, {} warned, {} failed",
                summary.status,
                summary.objects_succeeded,
                summary.objects_warned,
                summary.objects_failed
            ),
        }
        summary
    }
}

/// Index of the first pending table none of whose parents is pending or
/// running. Falls back to the first table when nothing is running.
fn next_eligible(pending: &[TableMapping], running: &HashSet<String>, idle: bool) -> Option<usize> {
    let waiting: HashSet<String> = pending.iter().map(|t| t.qualified_name()).collect();
    pending
        .iter()
        .position(|t| {
            !t.depends_on
                .iter()
                .any(|p| running.contains(p) || waiting.contains(p))
        })
        .or_else(|| (idle && !pending.is_empty()).then_some(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        ColumnDefinition, ForeignKey, ProcedureDefinition, Row, RoutineKind, SqlValue,
        TableDefinition,
    };
    use crate::testing::{MemorySource, MemoryTarget};
    use crate::validate::ValidationStatus;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
source:
  host: db2host
  database: SAMPLE
  user: app
  schema: APP
target:
  host: pghost
  database: sample
  user: postgres
"#;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.checkpoint.file = dir.path().join("checkpoint.json");
        config.migration.manual_review_dir = dir.path().join("review");
        config.migration.batch_size = 1000;
        config
    }

    fn parent() -> TableDefinition {
        let mut t = TableDefinition::new("APP", "PARENT");
        t.columns.push(ColumnDefinition::new("ID", "INTEGER", 1).not_null());
        t.columns.push(ColumnDefinition::new("NAME", "VARCHAR(20)", 2));
        t.primary_key = vec!["ID".into()];
        t
    }

    fn child() -> TableDefinition {
        let mut t = TableDefinition::new("APP", "CHILD");
        t.columns.push(ColumnDefinition::new("ID", "INTEGER", 1).not_null());
        t.columns.push(ColumnDefinition::new("PARENT_ID", "INTEGER", 2));
        t.primary_key = vec!["ID".into()];
        t.foreign_keys.push(ForeignKey {
            name: "FK_CHILD_PARENT".into(),
            columns: vec!["PARENT_ID".into()],
            ref_schema: "APP".into(),
            ref_table: "PARENT".into(),
            ref_columns: vec!["ID".into()],
            on_delete: "NO ACTION".into(),
            on_update: "NO ACTION".into(),
        });
        t
    }

    fn parent_rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|i| vec![SqlValue::Text(i.to_string()), SqlValue::Text(format!("p{}", i))])
            .collect()
    }

    fn child_rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|i| vec![SqlValue::Text(i.to_string()), SqlValue::Text("1".into())])
            .collect()
    }

    /// CHILD is listed first so ordering has to come from the FK.
    fn source(parents: i64, children: i64) -> MemorySource {
        let catalog = Catalog {
            tables: vec![child(), parent()],
            ..Default::default()
        };
        MemorySource::new(catalog)
            .with_rows("APP.PARENT", parent_rows(parents))
            .with_rows("APP.CHILD", child_rows(children))
    }

    fn orchestrator(config: Config, source: MemorySource, target: &MemoryTarget) -> Orchestrator {
        Orchestrator::new(config, Arc::new(source), Arc::new(target.clone()))
    }

    fn position(ddl: &[String], needle: &str) -> usize {
        ddl.iter()
            .position(|s| s.contains(needle))
            .unwrap_or_else(|| panic!("no statement containing {needle}"))
    }

    #[tokio::test]
    async fn test_full_run_creates_parent_before_child() {
        let dir = TempDir::new().unwrap();
        let target = MemoryTarget::new();
        let summary = orchestrator(config(&dir), source(1000, 50), &target).run().await;

        assert_eq!(summary.status, RunStatus::Completed, "{:?}", summary.error);
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.rows_transferred, 1050);
        assert_eq!(summary.tables_total, 2);
        assert_eq!(target.rows("public.PARENT").len(), 1000);
        assert_eq!(target.rows("public.CHILD").len(), 50);

        let ddl = target.ddl();
        let parent_body = position(&ddl, "CREATE TABLE \"public\".\"PARENT\"");
        let child_body = position(&ddl, "CREATE TABLE \"public\".\"CHILD\"");
        let fk = position(&ddl, "FK_CHILD_PARENT");
        assert!(parent_body < child_body);
        assert!(child_body < fk);

        let validation = summary.validation.as_ref().unwrap();
        assert!(validation.is_success());
        assert!(!dir.path().join("checkpoint.json").exists());
        let phases: Vec<Phase> = summary.phases.iter().map(|p| p.phase).collect();
        assert_eq!(phases, Phase::for_mode(MigrationMode::Full));
    }

    #[tokio::test]
    async fn test_interrupted_run_resumes_remaining_batches() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.migration.include_tables = vec!["PARENT".into()];
        let target = MemoryTarget::new();
        let cancel = CancellationToken::new();
        target.cancel_after_commits(3, cancel.clone());

        let summary = orchestrator(cfg.clone(), source(5000, 0), &target)
            .with_cancel(cancel)
            .run()
            .await;
        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.exit_code(), 130);
        assert_eq!(target.rows("public.PARENT").len(), 3000);
        let checkpoint = ProgressTracker::restore(&cfg.checkpoint.file).unwrap();
        assert_eq!(checkpoint.table_offsets.get("APP.PARENT"), Some(&3000));

        let resumed_source = source(5000, 0);
        let summary = Orchestrator::new(cfg.clone(), Arc::new(resumed_source), Arc::new(target.clone()))
            .resume()
            .run()
            .await;
        assert_eq!(summary.status, RunStatus::Completed, "{:?}", summary.error);
        assert_eq!(summary.rows_transferred, 2000);
        assert_eq!(target.commits(), 5);
        assert_eq!(target.rows("public.PARENT").len(), 5000);
        assert_eq!(summary.phase(Phase::CreateSchema).unwrap().outcome, PhaseOutcome::Skipped);

        let creates = target
            .ddl()
            .iter()
            .filter(|s| s.starts_with("CREATE TABLE"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_existing_checkpoint_requires_resume() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        ProgressTracker::create(&cfg.checkpoint.file, MigrationMode::Full, &cfg.hash(), false).unwrap();

        let target = MemoryTarget::new();
        let summary = orchestrator(cfg, source(1, 1), &target).run().await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.exit_code(), 5);
        assert!(target.ddl().is_empty());
    }

    #[tokio::test]
    async fn test_schema_only_moves_no_data() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.migration.mode = MigrationMode::SchemaOnly;
        let target = MemoryTarget::new();
        let summary = orchestrator(cfg, source(10, 10), &target).run().await;

        assert_eq!(summary.status, RunStatus::Completed, "{:?}", summary.error);
        assert_eq!(summary.rows_transferred, 0);
        assert!(target.has_table("public.PARENT"));
        assert!(target.rows("public.PARENT").is_empty());
        assert!(target.ddl().iter().any(|s| s.contains("FK_CHILD_PARENT")));
        assert!(summary.phase(Phase::TransferData).is_none());
        assert!(summary.validation.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_data_only_requires_target_tables() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.migration.mode = MigrationMode::DataOnly;
        let target = MemoryTarget::new().with_table("public.PARENT", &[("ID", "integer")]);
        let summary = orchestrator(cfg, source(3, 3), &target).run().await;

        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.exit_code(), 6);
        let error = summary.error.unwrap();
        assert!(error.contains("public.CHILD does not exist"), "{error}");
        assert!(error.contains("column NAME is missing"), "{error}");
        assert_eq!(target.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_data_only_transfers_into_existing_tables() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.migration.mode = MigrationMode::DataOnly;
        let target = MemoryTarget::new()
            .with_table("public.PARENT", &[("ID", "integer"), ("NAME", "character varying(20)")])
            .with_table("public.CHILD", &[("ID", "integer"), ("PARENT_ID", "integer")]);
        let summary = orchestrator(cfg, source(20, 5), &target).run().await;

        assert_eq!(summary.status, RunStatus::Completed, "{:?}", summary.error);
        assert_eq!(summary.rows_transferred, 25);
        assert!(target.ddl().is_empty());
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_validation_and_keeps_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.migration.mode = MigrationMode::DataOnly;
        cfg.migration.include_tables = vec!["PARENT".into()];
        let target = MemoryTarget::new()
            .with_table("public.PARENT", &[("ID", "integer"), ("NAME", "character varying(20)")]);
        target.set_rows(
            "public.PARENT",
            vec![vec![SqlValue::Int(0), SqlValue::Text("stale".into())]],
        );
        let summary = orchestrator(cfg.clone(), source(999, 0), &target).run().await;

        assert_eq!(summary.status, RunStatus::CompletedWithErrors);
        assert_eq!(summary.exit_code(), 4);
        let validation = summary.validation.unwrap();
        let parent = validation.table("APP.PARENT").unwrap();
        assert_eq!(parent.status, ValidationStatus::Failed);
        assert_eq!(parent.source_row_count, Some(999));
        assert_eq!(parent.target_row_count, Some(1000));
        assert!(cfg.checkpoint.file.exists());
    }

    #[tokio::test]
    async fn test_table_ddl_failure_aborts_without_continue_on_error() {
        let dir = TempDir::new().unwrap();
        let target = MemoryTarget::new();
        target.fail_ddl_containing("\"public\".\"PARENT\" (");
        let summary = orchestrator(config(&dir), source(5, 5), &target).run().await;

        assert_eq!(summary.status, RunStatus::Failed);
        assert_ne!(summary.exit_code(), 0);
        assert!(summary.phase(Phase::CreateSchema).unwrap().outcome.is_failure());
        assert!(summary.phase(Phase::TransferData).is_none());
        assert_eq!(target.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_table_ddl_failure_blocks_dependents_with_continue_on_error() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.migration.continue_on_error = true;
        let mut other = TableDefinition::new("APP", "OTHER");
        other.columns.push(ColumnDefinition::new("ID", "INTEGER", 1));
        let catalog = Catalog {
            tables: vec![parent(), child(), other],
            ..Default::default()
        };
        let source = MemorySource::new(catalog)
            .with_rows("APP.PARENT", parent_rows(3))
            .with_rows("APP.CHILD", child_rows(3))
            .with_rows("APP.OTHER", vec![vec![SqlValue::Text("7".into())]]);
        let target = MemoryTarget::new();
        target.fail_ddl_containing("\"public\".\"PARENT\" (");

        let summary = orchestrator(cfg, source, &target).run().await;
        assert_eq!(summary.status, RunStatus::CompletedWithErrors);
        assert_eq!(summary.exit_code(), 1);
        assert!(summary.failed_objects.contains_key("table:APP.PARENT"));
        assert!(summary.failed_objects.contains_key("table:APP.CHILD"));
        assert!(!target.has_table("public.CHILD"));
        assert_eq!(target.rows("public.OTHER").len(), 1);
    }

    #[tokio::test]
    async fn test_workers_respect_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.migration.workers = 4;
        cfg.migration.batch_size = 7;
        let target = MemoryTarget::new();
        let source = Arc::new(source(100, 40));
        let summary = Orchestrator::new(cfg, source.clone(), Arc::new(target.clone()))
            .run()
            .await;

        assert_eq!(summary.status, RunStatus::Completed, "{:?}", summary.error);
        let opens: Vec<String> = source.cursor_opens().into_iter().map(|(t, _)| t).collect();
        assert_eq!(opens, vec!["APP.PARENT".to_string(), "APP.CHILD".to_string()]);
        assert_eq!(target.rows("public.CHILD").len(), 40);
    }

    #[tokio::test]
    async fn test_excluded_routine_is_saved_for_review() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let mut catalog = Catalog {
            tables: vec![parent()],
            ..Default::default()
        };
        catalog.procedures.push(ProcedureDefinition {
            schema: "APP".into(),
            name: "EMPTY_PROC".into(),
            kind: RoutineKind::Procedure,
            definition: String::new(),
            parameters: Vec::new(),
        });
        let source = MemorySource::new(catalog).with_rows("APP.PARENT", parent_rows(1));
        let target = MemoryTarget::new();
        let summary = orchestrator(cfg.clone(), source, &target).run().await;

        assert_eq!(summary.status, RunStatus::CompletedWithErrors);
        assert!(summary.failed_objects.contains_key("procedure:APP.EMPTY_PROC"));
        assert!(cfg
            .migration
            .manual_review_dir
            .join("APP.EMPTY_PROC_conversion.sql")
            .exists());
    }

    #[tokio::test]
    async fn test_validate_only_reports_without_checkpoint() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let target = MemoryTarget::new()
            .with_table("public.PARENT", &[("ID", "integer"), ("NAME", "varchar(20)")]);
        let report = orchestrator(cfg.clone(), source(2, 0), &target)
            .validate_only()
            .await
            .unwrap();

        assert_eq!(report.table("APP.PARENT").unwrap().status, ValidationStatus::Failed);
        assert_eq!(report.table("APP.CHILD").unwrap().status, ValidationStatus::Failed);
        assert!(!cfg.checkpoint.file.exists());
    }

    #[test]
    fn test_next_eligible_waits_for_parents() {
        let plan = SchemaConverter::new(crate::typemap::TypeMapper::new(), "APP", "public").plan(&Catalog {
            tables: vec![child(), parent()],
            ..Default::default()
        });
        let pending = plan.tables.clone();
        assert_eq!(pending[0].qualified_name(), "APP.PARENT");

        let child_only = vec![pending[1].clone()];
        let running: HashSet<String> = ["APP.PARENT".to_string()].into();
        assert_eq!(next_eligible(&child_only, &running, false), None);
        assert_eq!(next_eligible(&child_only, &HashSet::new(), true), Some(0));
    }
}
