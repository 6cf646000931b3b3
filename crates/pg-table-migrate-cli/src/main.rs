//! pg-table-migrate CLI - chunked table copy between PostgreSQL servers.

use clap::{Parser, Subcommand};
use pg_table_migrate::error::EXIT_WRITE_ERROR;
use pg_table_migrate::{
    ChunkErrorPolicy, Config, MigrateError, MigrationResult, Orchestrator, RunStatus,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-table-migrate")]
#[command(about = "Copy a PostgreSQL table into another table in transactional chunks")]
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

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Source password (overrides the config file)
    #[arg(long, env = "PGTM_SOURCE_PASSWORD", hide_env_values = true)]
    source_password: Option<String>,

    /// Target password (overrides the config file)
    #[arg(long, env = "PGTM_TARGET_PASSWORD", hide_env_values = true)]
    target_password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the source table into the target table
    Run {
        /// Override rows per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override chunk failure policy: continue or abort
        #[arg(long)]
        on_chunk_error: Option<ChunkErrorPolicy>,

        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override source table
        #[arg(long)]
        source_table: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override target table
        #[arg(long)]
        target_table: Option<String>,
    },

    /// Compare row counts between source and target tables
    Validate,

    /// Test database connections
    HealthCheck,

    /// Print the source table's column order
    Columns,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format, cli.log_file.as_deref())?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    if let Some(password) = cli.source_password {
        config.source.password = password;
    }
    if let Some(password) = cli.target_password {
        config.target.password = password;
    }

    match cli.command {
        Commands::Run {
            chunk_size,
            on_chunk_error,
            source_schema,
            source_table,
            target_schema,
            target_table,
        } => {
            // Apply overrides
            if let Some(size) = chunk_size {
                config.migration.chunk_size = size;
            }
            if let Some(policy) = on_chunk_error {
                config.migration.on_chunk_error = policy;
            }
            if let Some(schema) = source_schema {
                config.tables.source.schema = schema;
            }
            if let Some(table) = source_table {
                config.tables.source.table = table;
            }
            if let Some(schema) = target_schema {
                config.tables.target.schema = schema;
            }
            if let Some(table) = target_table {
                config.tables.target.table = table;
            }

            let cancel_token = setup_signal_handler()?;
            let orchestrator = Orchestrator::new(config);

            match orchestrator.run(Some(cancel_token)).await {
                Ok(result) => {
                    print_result(&result, cli.output_json)?;
                    if result.run.chunks_failed > 0 {
                        return Ok(ExitCode::from(EXIT_WRITE_ERROR));
                    }
                }
                Err(aborted) => {
                    print_result(&aborted.result, cli.output_json)?;
                    return Err(aborted.error);
                }
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config);
            let result = orchestrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Row counts:");
                println!("  Source {}: {}", result.source_table, result.source_rows);
                println!("  Target {}: {}", result.target_table, result.target_rows);
                println!(
                    "\n  Result: {}",
                    if result.matches { "MATCH" } else { "MISMATCH" }
                );
            }

            if !result.matches {
                return Err(MigrateError::Validation(format!(
                    "{} has {} rows but {} has {}",
                    result.source_table, result.source_rows, result.target_table, result.target_rows
                )));
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config);
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    orchestrator.config().source.endpoint(),
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    orchestrator.config().target.endpoint(),
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                let failed = if result.source_connected {
                    &orchestrator.config().target
                } else {
                    &orchestrator.config().source
                };
                return Err(MigrateError::connection(
                    failed.endpoint(),
                    "health check failed",
                ));
            }
        }

        Commands::Columns => {
            let orchestrator = Orchestrator::new(config);
            let columns = orchestrator.columns().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(columns.names())?);
            } else {
                println!("{}:", orchestrator.config().tables.source);
                for (position, name) in columns.iter().enumerate() {
                    println!("  {:>3}  {}", position + 1, name);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_result(result: &MigrationResult, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    let headline = match result.status {
        RunStatus::Done if result.run.chunks_failed == 0 => "Migration completed!".to_string(),
        RunStatus::Done => "Migration completed with failed chunks!".to_string(),
        RunStatus::Aborted => format!("Migration aborted during {}!", result.phase),
    };
    println!("\n{}", headline);
    println!("  Run ID: {}", result.run_id);
    println!("  {} -> {}", result.source_table, result.target_table);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Chunks: {} attempted, {} committed, {} failed",
        result.run.chunks_attempted, result.run.chunks_committed, result.run.chunks_failed
    );
    println!("  Rows: {}", result.run.rows_transferred);
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    for failed in &result.run.failed_chunks {
        println!(
            "  Failed chunk {} ({} rows): {}",
            failed.index, failed.rows, failed.cause
        );
    }
    if let Some(ref err) = result.error {
        println!("  Error: {}", err);
    }

    Ok(())
}

fn setup_logging(
    verbosity: &str,
    format: &str,
    log_file: Option<&Path>,
) -> Result<(), MigrateError> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .with_target(false);

    let installed = if format == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| MigrateError::Config(format!("logging setup failed: {}", e)))
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM. The returned token is cancelled
/// when either arrives; the run stops at the next chunk boundary.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
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
            "\nReceived {}. Stopping after the chunk in flight...",
            name
        );
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the chunk in flight...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
