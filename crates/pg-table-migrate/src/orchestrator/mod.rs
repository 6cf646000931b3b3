//! Migration orchestrator - main workflow coordinator.
//!
//! One run walks `Init -> Connecting -> Introspecting -> Transferring ->
//! Finalizing` and ends either done or aborted. Whatever happens, every
//! handle that was opened is closed exactly once and a [`MigrationResult`]
//! with the counts accumulated so far is produced.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{
    validate_run, ChunkErrorPolicy, Config, ConnectionConfig, MigrationConfig, TablesConfig,
};
use crate::core::schema::{ColumnOrder, TableIdentity};
use crate::core::traits::{ConnectionProvider, SourceReader, TargetWriter};
use crate::drivers::postgres::PgConnectionProvider;
use crate::error::{MigrateError, Result};
use crate::transfer::{with_timeout, ChunkReader, ChunkWriter};

/// Phase of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Connecting,
    Introspecting,
    Transferring,
    Finalizing,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::Connecting => "connecting",
            RunPhase::Introspecting => "introspecting",
            RunPhase::Transferring => "transferring",
            RunPhase::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The transfer loop completed. Some chunks may still have failed.
    Done,
    /// A fatal error ended the run early.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Done => f.write_str("done"),
            RunStatus::Aborted => f.write_str("aborted"),
        }
    }
}

/// A chunk that was rolled back and skipped.
///
/// Carries enough to replay it by hand: rows `(index - 1) * chunk_size + 1`
/// through `(index - 1) * chunk_size + rows` of the source scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedChunk {
    pub index: u64,
    pub rows: usize,
    pub cause: String,
}

/// Counters of one orchestration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRun {
    pub chunks_attempted: u64,
    pub chunks_committed: u64,
    pub chunks_failed: u64,
    pub rows_transferred: u64,

    /// One entry per failed chunk, in chunk order.
    pub failed_chunks: Vec<FailedChunk>,
}

impl MigrationRun {
    fn record_commit(&mut self, rows: u64) {
        self.chunks_committed += 1;
        self.rows_transferred += rows;
    }

    fn record_failure(&mut self, index: u64, rows: usize, cause: &str) {
        self.chunks_failed += 1;
        self.failed_chunks.push(FailedChunk {
            index,
            rows,
            cause: cause.to_string(),
        });
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// Last phase entered. For aborted runs, the phase that failed.
    pub phase: RunPhase,

    pub source_table: String,
    pub target_table: String,
    pub chunk_size: usize,
    pub on_chunk_error: ChunkErrorPolicy,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    #[serde(flatten)]
    pub run: MigrationRun,

    /// Fatal error message for aborted runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Done with no failed chunks.
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Done && self.run.chunks_failed == 0
    }
}

/// A run that ended in the aborted state.
#[derive(Debug, Error)]
#[error("Migration aborted during {phase}: {error}", phase = .result.phase)]
pub struct MigrationAborted {
    /// Summary with the counts accumulated before the failure.
    pub result: Box<MigrationResult>,

    #[source]
    pub error: MigrateError,
}

impl MigrationAborted {
    /// Exit code of the underlying error.
    pub fn exit_code(&self) -> u8 {
        self.error.exit_code()
    }
}

/// Connectivity of both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Row counts of the source and target tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub source_table: String,
    pub source_rows: i64,
    pub target_table: String,
    pub target_rows: i64,
    pub matches: bool,
}

/// Mutable bookkeeping of one run.
struct RunTracker {
    run_id: String,
    started_at: DateTime<Utc>,
    clock: Instant,
    phase: RunPhase,
    run: MigrationRun,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            clock: Instant::now(),
            phase: RunPhase::Init,
            run: MigrationRun::default(),
        }
    }
}

/// Copies one table into another, chunk by chunk.
pub struct Orchestrator<P: ConnectionProvider = PgConnectionProvider> {
    provider: P,
    config: Config,
}

impl Orchestrator<PgConnectionProvider> {
    /// Create an orchestrator that talks to PostgreSQL.
    pub fn new(config: Config) -> Self {
        let provider = PgConnectionProvider::new(config.migration.connect_timeout());
        Self::with_provider(provider, config)
    }
}

impl<P: ConnectionProvider> Orchestrator<P> {
    /// Create an orchestrator over any connection provider.
    pub fn with_provider(provider: P, config: Config) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the migration.
    ///
    /// Cancellation is honoured between chunks only; a chunk in flight is
    /// always committed or rolled back first.
    pub async fn run(
        &self,
        cancel: Option<CancellationToken>,
    ) -> std::result::Result<MigrationResult, MigrationAborted> {
        let cancel = cancel.unwrap_or_default();
        let mut tracker = RunTracker::new();
        let tables = &self.config.tables;
        let options = &self.config.migration;

        if let Err(e) = validate_run(
            &self.config.source,
            &self.config.target,
            &tables.source,
            &tables.target,
            options,
        ) {
            error!("Migration rejected: {}", e);
            let result = self.summarize(tracker, RunStatus::Aborted, Some(&e));
            return Err(MigrationAborted {
                result: Box::new(result),
                error: e,
            });
        }

        info!(
            "Starting migration run {}: {} -> {} (chunk_size={}, on_chunk_error={})",
            tracker.run_id, tables.source, tables.target, options.chunk_size, options.on_chunk_error
        );

        let outcome = self.execute(&mut tracker, &cancel).await;

        let (status, error) = match outcome {
            Ok(()) => (RunStatus::Done, None),
            Err(e) => (RunStatus::Aborted, Some(e)),
        };
        let result = self.summarize(tracker, status, error.as_ref());
        self.log_summary(&result);

        match error {
            None => Ok(result),
            Some(error) => Err(MigrationAborted {
                result: Box::new(result),
                error,
            }),
        }
    }

    /// Connect, transfer, and release. Handles are closed here and only here.
    async fn execute(&self, tracker: &mut RunTracker, cancel: &CancellationToken) -> Result<()> {
        tracker.phase = RunPhase::Connecting;
        let mut source = self.connect_source().await?;
        let mut target = match self.connect_target().await {
            Ok(target) => target,
            Err(e) => {
                self.release("source", source.close()).await;
                return Err(e);
            }
        };

        let transferred = self
            .transfer(&mut source, &mut target, tracker, cancel)
            .await;
        if transferred.is_ok() {
            tracker.phase = RunPhase::Finalizing;
        }

        self.release("source", source.close()).await;
        self.release("target", target.close()).await;
        transferred
    }

    async fn transfer(
        &self,
        source: &mut P::Source,
        target: &mut P::Target,
        tracker: &mut RunTracker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let tables = &self.config.tables;
        let options = &self.config.migration;

        tracker.phase = RunPhase::Introspecting;
        let columns = source.column_order(&tables.source).await?;
        info!(
            "Column order for {} ({} columns): {}",
            tables.source,
            columns.len(),
            columns
        );

        tracker.phase = RunPhase::Transferring;
        let mut reader = ChunkReader::open(
            source,
            &tables.source,
            &columns,
            options.chunk_size,
            options.fetch_timeout(),
        )
        .await?;
        let mut writer =
            ChunkWriter::new(target, &tables.target, &columns, options.commit_timeout());

        loop {
            if cancel.is_cancelled() {
                warn!(
                    "Cancellation requested; stopping after {} chunks",
                    tracker.run.chunks_attempted
                );
                self.close_reader(reader).await;
                return Err(MigrateError::Cancelled);
            }

            let Some(batch) = reader.next_chunk().await? else {
                break;
            };
            tracker.run.chunks_attempted += 1;

            match writer.write(&batch).await {
                Ok(rows) => {
                    tracker.run.record_commit(rows);
                    debug!(
                        "Progress: {} rows in {} chunks",
                        tracker.run.rows_transferred, tracker.run.chunks_committed
                    );
                }
                Err(e) => {
                    let cause = match &e {
                        MigrateError::Write { cause, .. } => cause.clone(),
                        other => other.to_string(),
                    };
                    error!(
                        "Chunk {} failed and was rolled back ({} rows): {}",
                        batch.index,
                        batch.len(),
                        cause
                    );
                    tracker.run.record_failure(batch.index, batch.len(), &cause);

                    if options.on_chunk_error == ChunkErrorPolicy::Abort || !e.is_recoverable() {
                        error!(
                            "Stopping at chunk {} (on_chunk_error={})",
                            batch.index, options.on_chunk_error
                        );
                        self.close_reader(reader).await;
                        return Err(e);
                    }
                    warn!(
                        "Skipping chunk {}: {} rows not copied (on_chunk_error=continue)",
                        batch.index,
                        batch.len()
                    );
                }
            }
        }

        Ok(())
    }

    async fn connect_source(&self) -> Result<P::Source> {
        let config = &self.config.source;
        with_timeout(
            Some(self.config.migration.connect_timeout()),
            self.provider.connect_source(config),
            |limit| connect_timed_out(config, limit),
        )
        .await
    }

    async fn connect_target(&self) -> Result<P::Target> {
        let config = &self.config.target;
        with_timeout(
            Some(self.config.migration.connect_timeout()),
            self.provider.connect_target(config),
            |limit| connect_timed_out(config, limit),
        )
        .await
    }

    /// End an unfinished scan before the source handle is released.
    async fn close_reader(&self, reader: ChunkReader<'_, P::Source>) {
        let table = self.config.tables.source.to_string();
        let closed = with_timeout(self.config.migration.fetch_timeout(), reader.close(), |limit| {
            MigrateError::read(table, format!("closing scan timed out after {:?}", limit))
        })
        .await;
        if let Err(e) = closed {
            warn!("Failed to close source scan: {}", e);
        }
    }

    /// Close a handle; a failure to close is logged, never fatal.
    ///
    /// Bounded by the connect timeout.
    async fn release(&self, side: &str, close: impl Future<Output = Result<()>>) {
        let closed = with_timeout(Some(self.config.migration.connect_timeout()), close, |limit| {
            MigrateError::connection(side, format!("close timed out after {:?}", limit))
        })
        .await;
        if let Err(e) = closed {
            warn!("Failed to release {} connection: {}", side, e);
        }
    }

    fn summarize(
        &self,
        tracker: RunTracker,
        status: RunStatus,
        error: Option<&MigrateError>,
    ) -> MigrationResult {
        let duration = tracker.clock.elapsed().as_secs_f64();
        let rows_per_second = if duration > 0.0 {
            (tracker.run.rows_transferred as f64 / duration) as u64
        } else {
            0
        };

        MigrationResult {
            run_id: tracker.run_id,
            status,
            phase: tracker.phase,
            source_table: self.config.tables.source.to_string(),
            target_table: self.config.tables.target.to_string(),
            chunk_size: self.config.migration.chunk_size,
            on_chunk_error: self.config.migration.on_chunk_error,
            started_at: tracker.started_at,
            completed_at: Utc::now(),
            duration_seconds: duration,
            rows_per_second,
            run: tracker.run,
            error: error.map(|e| e.to_string()),
        }
    }

    fn log_summary(&self, result: &MigrationResult) {
        if let Some(err) = &result.error {
            error!("Migration aborted during {}: {}", result.phase, err);
        }
        info!(
            "Migration {}: {} chunks attempted, {} committed, {} failed, {} rows in {:.1}s ({} rows/s)",
            result.status,
            result.run.chunks_attempted,
            result.run.chunks_committed,
            result.run.chunks_failed,
            result.run.rows_transferred,
            result.duration_seconds,
            result.rows_per_second
        );
        for failed in &result.run.failed_chunks {
            warn!(
                "Lost chunk {} ({} rows): {}",
                failed.index, failed.rows, failed.cause
            );
        }
    }

    /// Open and release both connections.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let started = Instant::now();
        let (source_connected, source_error) = match self.connect_source().await {
            Ok(source) => {
                self.release("source", source.close()).await;
                (true, None)
            }
            Err(e) => (false, Some(e.to_string())),
        };
        let source_latency_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let (target_connected, target_error) = match self.connect_target().await {
            Ok(target) => {
                self.release("target", target.close()).await;
                (true, None)
            }
            Err(e) => (false, Some(e.to_string())),
        };
        let target_latency_ms = started.elapsed().as_millis() as u64;

        Ok(HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_error,
            target_connected,
            target_latency_ms,
            target_error,
            healthy: source_connected && target_connected,
        })
    }

    /// Column order of the source table.
    pub async fn columns(&self) -> Result<ColumnOrder> {
        let mut source = self.connect_source().await?;
        let columns = source.column_order(&self.config.tables.source).await;
        self.release("source", source.close()).await;
        columns
    }

    /// Validate row counts between source and target.
    pub async fn validate(&self) -> Result<ValidationResult> {
        let TablesConfig { source, target } = &self.config.tables;

        let mut reader = self.connect_source().await?;
        let source_rows = reader.row_count(source).await;
        self.release("source", reader.close()).await;
        let source_rows = source_rows?;

        let mut writer = self.connect_target().await?;
        let target_rows = writer.row_count(target).await;
        self.release("target", writer.close()).await;
        let target_rows = target_rows?;

        let matches = source_rows == target_rows;
        if matches {
            info!("{} -> {}: {} rows (match)", source, target, source_rows);
        } else {
            warn!(
                "{} -> {}: source={} target={} (MISMATCH)",
                source, target, source_rows, target_rows
            );
        }

        Ok(ValidationResult {
            source_table: source.to_string(),
            source_rows,
            target_table: target.to_string(),
            target_rows,
            matches,
        })
    }
}

fn connect_timed_out(config: &ConnectionConfig, limit: Duration) -> MigrateError {
    MigrateError::connection(
        config.endpoint(),
        format!("connection timed out after {:?}", limit),
    )
}

/// Copy `source_table` on `source` into `target_table` on `target`.
///
/// ```rust,no_run
/// use pg_table_migrate::{
///     migrate_table, ChunkErrorPolicy, ConnectionConfig, MigrationConfig, TableIdentity,
/// };
///
/// # async fn demo() {
/// let source = ConnectionConfig::new("src.internal", "sales", "reader", "secret");
/// let target = ConnectionConfig::new("dst.internal", "warehouse", "writer", "secret");
/// let options = MigrationConfig::default()
///     .with_chunk_size(1000)
///     .with_policy(ChunkErrorPolicy::Abort);
///
/// match migrate_table(
///     &source,
///     &target,
///     &TableIdentity::new("public", "orders"),
///     &TableIdentity::new("archive", "orders"),
///     &options,
/// )
/// .await
/// {
///     Ok(result) => println!("copied {} rows", result.run.rows_transferred),
///     Err(aborted) => eprintln!("{}", aborted),
/// }
/// # }
/// ```
pub async fn migrate_table(
    source: &ConnectionConfig,
    target: &ConnectionConfig,
    source_table: &TableIdentity,
    target_table: &TableIdentity,
    options: &MigrationConfig,
) -> std::result::Result<MigrationResult, MigrationAborted> {
    let config = Config {
        source: source.clone(),
        target: target.clone(),
        tables: TablesConfig {
            source: source_table.clone(),
            target: target_table.clone(),
        },
        migration: options.clone(),
    };
    Orchestrator::new(config).run(None).await
}
