//! db2-pg-migrate CLI - resumable DB2 to PostgreSQL migration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use db2_pg_migrate::{
    Config, Db2Source, LogFormat, MigrateError, MigrationMode, MigrationSummary, Orchestrator,
    PgTarget, ProgressUpdate,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "db2-pg-migrate")]
#[command(about = "Resumable DB2 to PostgreSQL schema and data migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json (overrides logging.format)
    #[arg(long)]
    log_format: Option<LogFormatArg>,

    /// Log verbosity: trace, debug, info, warn, error (overrides logging.level)
    #[arg(long)]
    verbosity: Option<String>,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new migration
    Run {
        /// Phases to run: full, schema-only or data-only
        #[arg(long)]
        mode: Option<MigrationMode>,

        /// Only migrate tables matching these patterns (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override number of parallel table workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Resume a previously interrupted migration from its checkpoint
    Resume {
        /// Override number of parallel table workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Compare row counts, schema and sampled values between source and target
    Validate,

    /// Validate the configuration file without migrating
    CheckConfig {
        /// Also test both database connections
        #[arg(long)]
        connect: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;

    // Setup logging
    let level = cli
        .verbosity
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let format = cli
        .log_format
        .map(LogFormat::from)
        .unwrap_or(config.logging.format);
    setup_logging(&level, format, config.logging.file.as_deref())
        .map_err(|e| MigrateError::Config(format!("{:#}", e)))?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            mode,
            tables,
            batch_size,
            workers,
        } => {
            // Apply overrides
            if let Some(mode) = mode {
                config.migration.mode = mode;
            }
            if !tables.is_empty() {
                config.migration.include_tables = tables;
            }
            if let Some(size) = batch_size {
                config.migration.batch_size = size;
            }
            if let Some(w) = workers {
                config.migration.workers = w;
            }
            config.validate()?;

            let cancel_token = setup_signal_handler();
            let orchestrator = Orchestrator::connect(config).await?.with_cancel(cancel_token);
            let summary = run_with_progress(orchestrator, cli.progress).await;
            print_summary(&summary, cli.output_json)?;
            Ok(summary.exit_code())
        }

        Commands::Resume { workers } => {
            if !config.checkpoint.file.exists() {
                info!(
                    "No checkpoint at {:?}; starting a fresh run",
                    config.checkpoint.file
                );
            }
            if let Some(w) = workers {
                config.migration.workers = w;
            }
            config.validate()?;

            let cancel_token = setup_signal_handler();
            let orchestrator = Orchestrator::connect(config)
                .await?
                .with_cancel(cancel_token)
                .resume();
            info!("Resuming from previous checkpoint");
            let summary = run_with_progress(orchestrator, cli.progress).await;
            print_summary(&summary, cli.output_json)?;
            Ok(summary.exit_code())
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::connect(config).await?;
            let report = orchestrator.validate_only().await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.to_text());
            }

            if report.is_success() {
                Ok(0)
            } else {
                Err(MigrateError::ValidationMismatch(format!(
                    "{} table(s) failed validation",
                    report.failed
                )))
            }
        }

        Commands::CheckConfig { connect } => {
            println!("Configuration OK: {}", cli.config.display());
            println!("  Source: {}", config.source.redacted());
            println!("  Source schema: {}", config.source.effective_schema());
            println!("  Target: {}", config.target.redacted());
            println!("  Target schema: {}", config.target.schema);
            println!("  Mode: {}", config.migration.mode);
            println!("  Checkpoint: {}", config.checkpoint.file.display());
            println!("  Config hash: {}", config.hash());

            if connect {
                Db2Source::connect(&config.source).await?;
                println!("  Source connection: OK");
                PgTarget::connect(&config.target, 1).await?;
                println!("  Target connection: OK");
            }
            Ok(0)
        }
    }
}

fn load_config(path: &Path) -> Result<Config, MigrateError> {
    if !path.exists() {
        return Err(MigrateError::Config(format!(
            "configuration file not found: {}",
            path.display()
        )));
    }
    Config::load(path)
}

/// Run the orchestrator, printing progress events as JSON lines when asked.
async fn run_with_progress(orchestrator: Orchestrator, progress: bool) -> MigrationSummary {
    if !progress {
        return orchestrator.run().await;
    }

    let (tx, rx) = mpsc::channel(256);
    let printer = spawn_progress_printer(rx);
    let summary = orchestrator.with_progress(tx).run().await;
    // The reporter closes the channel when the run ends.
    let _ = printer.await;
    summary
}

fn spawn_progress_printer(mut rx: mpsc::Receiver<ProgressUpdate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&update) {
                eprintln!("{}", line);
            }
        }
    })
}

fn print_summary(summary: &MigrationSummary, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", summary.to_json()?);
        return Ok(());
    }

    println!("\nMigration {}", summary.status);
    println!("  Run ID: {}", summary.run_id);
    println!("  Mode: {}", summary.mode);
    println!("  Duration: {:.2}s", summary.duration_seconds);
    for phase in &summary.phases {
        println!(
            "  Phase {:<14} {} ({:.1}s)",
            phase.phase.as_str(),
            phase.outcome,
            phase.duration_seconds
        );
    }
    println!(
        "  Objects: {} succeeded, {} warned, {} failed",
        summary.objects_succeeded, summary.objects_warned, summary.objects_failed
    );
    println!(
        "  Tables: {}/{}",
        summary.tables_completed, summary.tables_total
    );
    println!("  Rows: {}", summary.rows_transferred);
    println!("  Throughput: {:.0} rows/sec", summary.rows_per_second);
    for (object, message) in &summary.failed_objects {
        println!("  Failed: {}: {}", object, message);
    }
    for excluded in &summary.excluded_objects {
        println!(
            "  Excluded {} {}: {}",
            excluded.kind, excluded.name, excluded.reason
        );
    }
    if let Some(report) = &summary.validation {
        println!(
            "  Validation: {} passed, {} failed, {} skipped",
            report.passed, report.failed, report.skipped
        );
    }
    if let Some(error) = &summary.error {
        println!("  Error: {}", error);
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: LogFormat, file: Option<&Path>) -> anyhow::Result<()> {
    let level = match verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => anyhow::bail!("unknown log level '{}'", other),
    };

    let writer = match file {
        Some(path) => {
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            BoxMakeWriter::new(std::io::stderr.and(Arc::new(log_file)))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(file.is_none())
        .with_writer(writer);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM. The orchestrator stops
/// at the next batch boundary and leaves a resumable checkpoint.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!(
                        "\nReceived {}. Stopping after the current batch; run `resume` to continue.",
                        name
                    );
                    token.cancel();
                });
            }
            Err(e) => eprintln!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Windows only delivers Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}
