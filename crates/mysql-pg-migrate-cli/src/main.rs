//! mysql-pg-migrate CLI - MySQL to PostgreSQL data migration.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mysql_pg_migrate::error::EXIT_CANCELLED;
use mysql_pg_migrate::{Config, ErrorCollector, MigrateError, MigrationResult, Orchestrator};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mysql-pg-migrate")]
#[command(about = "MySQL to PostgreSQL data migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run {
        /// Analyze and show the table mapping without transferring data
        #[arg(long)]
        dry_run: bool,

        /// Skip failing batches and tables instead of stopping
        #[arg(long)]
        continue_on_error: bool,

        /// Truncate mapped target tables before loading (destructive)
        #[arg(long)]
        truncate: bool,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Validate source and target after loading
        #[arg(long)]
        validate: bool,
    },

    /// Show the table mapping and record counts without transferring data
    DryRun,

    /// Test database connections
    TestConnections,

    /// Validate row counts, columns, samples and foreign keys between source and target
    Validate,

    /// Print the effective configuration with passwords masked
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Config => {
            print!("{}", config.redacted_yaml()?);
        }

        Commands::TestConnections => {
            let orchestrator = Orchestrator::new(config)?;
            let ok = orchestrator.test_connections().await;
            orchestrator.close().await;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "success": ok,
                        "errors": orchestrator.errors().export(),
                    }))?
                );
            } else {
                println!("Connection test: {}", if ok { "OK" } else { "FAILED" });
                if !ok {
                    print!("{}", orchestrator.errors().render_summary());
                }
            }

            if !ok {
                return Err(MigrateError::pool(
                    "connection test failed",
                    "test-connections",
                ));
            }
        }

        Commands::DryRun | Commands::Run { dry_run: true, .. } => {
            let orchestrator = Orchestrator::new(config)?;
            let report = orchestrator.dry_run().await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
                print_error_summary(&orchestrator.errors());
            }

            if !report.success {
                return Err(MigrateError::SchemaExtraction(
                    "dry run found problems that would block the migration".into(),
                ));
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config)?;
            let report = orchestrator.validate().await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
                print_error_summary(&orchestrator.errors());
            }

            if !report.passed {
                return Err(MigrateError::Validation(
                    "source and target differ".into(),
                ));
            }
        }

        Commands::Run {
            dry_run: false,
            continue_on_error,
            truncate,
            batch_size,
            validate,
        } => {
            if continue_on_error {
                config.migration.continue_on_error = true;
            }
            if truncate {
                config.migration.truncate_target_tables = true;
            }
            if let Some(n) = batch_size {
                config.migration.batch_size = n;
            }
            config.validate()?;

            let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;

            let mut orchestrator = Orchestrator::new(config)?.with_validation(validate);
            let mut printer = None;
            if cli.progress {
                let (tx, rx) = mpsc::unbounded_channel();
                orchestrator = orchestrator.with_progress_events(tx);
                printer = Some(spawn_progress_printer(rx));
            }

            let outcome = orchestrator.migrate(cancel_token).await;
            orchestrator.close().await;
            let errors = orchestrator.errors();
            drop(orchestrator);
            if let Some(printer) = printer {
                let _ = printer.await;
            }

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    if cli.output_json {
                        println!("{}", serde_json::to_string_pretty(&errors.export())?);
                    } else {
                        print_error_summary(&errors);
                    }
                    return Err(e);
                }
            };

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "result": result,
                        "errors": errors.export(),
                    }))?
                );
            } else {
                print_result(&result);
                print_error_summary(&errors);
            }

            if !result.succeeded() {
                return Err(run_failure(&result));
            }
        }
    }

    Ok(())
}

fn print_result(result: &MigrationResult) {
    let status_msg = if result.succeeded() {
        "Migration completed!"
    } else {
        "Migration failed!"
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Tables: {}/{}", result.tables_success, result.tables_total);
    if result.tables_skipped > 0 {
        println!("  Skipped: {}", result.tables_skipped);
    }
    println!("  Rows: {}", result.rows_transferred);
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    if !result.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", result.failed_tables);
    }
    if let Some(report) = &result.validation {
        print!("\n{}", report.render());
    }
}

fn print_error_summary(errors: &ErrorCollector) {
    if errors.has_errors() {
        print!("\n{}", errors.render_summary());
    }
}

fn run_failure(result: &MigrationResult) -> MigrateError {
    match &result.validation {
        Some(report) if !report.passed => {
            MigrateError::Validation("post-migration validation failed".into())
        }
        _ if result.failed_tables.is_empty() => MigrateError::transfer(
            "*",
            "migration stopped before all tables were processed",
        ),
        _ => MigrateError::transfer(
            result.failed_tables.join(", "),
            format!("{} tables failed", result.tables_failed),
        ),
    }
}

/// Print every progress event as a JSON line on stderr until the sender is dropped.
fn spawn_progress_printer(
    mut rx: mpsc::UnboundedReceiver<mysql_pg_migrate::ProgressEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => eprintln!("{}", line),
                Err(e) => warn!("Failed to serialize progress event: {}", e),
            }
        }
    })
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Exit the process if a cancelled run has not wound down in time.
fn force_exit_after(shutdown_timeout: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        eprintln!(
            "Shutdown did not finish within {}s, exiting",
            shutdown_timeout
        );
        std::process::exit(EXIT_CANCELLED as i32);
    });
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
        force_exit_after(shutdown_timeout);
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
        token.cancel();
        force_exit_after(shutdown_timeout);
    });

    Ok(cancel_token)
}
