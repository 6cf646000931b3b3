//! In-memory connection provider and log capture for unit tests.

use std::collections::HashSet;
use std::fmt::Write as FmtWrite;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use crate::config::ConnectionConfig;
use crate::core::schema::{ColumnOrder, TableIdentity};
use crate::core::traits::{ConnectionProvider, SourceReader, TargetWriter};
use crate::core::value::{Row, RowBatch, SqlValue};
use crate::error::{MigrateError, Result};

/// Observable side effects of a run against [`MemoryProvider`].
#[derive(Debug, Default)]
pub(crate) struct ProbeState {
    pub source_opened: usize,
    pub source_closed: usize,
    pub target_opened: usize,
    pub target_closed: usize,
    pub scans_opened: usize,
    pub scans_closed: usize,
    pub fetch_sizes: Vec<usize>,
    pub attempted_chunks: Vec<u64>,
    pub committed: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    pub fn get<T>(&self, f: impl FnOnce(&ProbeState) -> T) -> T {
        f(&self.0.lock().unwrap())
    }

    fn update(&self, f: impl FnOnce(&mut ProbeState)) {
        f(&mut self.0.lock().unwrap())
    }
}

/// Scripted failures and delays.
#[derive(Debug, Clone, Default)]
pub(crate) struct Faults {
    pub connect_source: bool,
    pub connect_target: bool,
    pub columns: bool,
    /// Fail every fetch after this many successful ones.
    pub read_after_fetches: Option<usize>,
    /// Chunk indexes whose insert fails.
    pub write_chunks: HashSet<u64>,
    /// Row position inside a failing chunk where the insert error happens.
    pub write_at_row: usize,
    pub connect_delay: Option<Duration>,
    pub fetch_delay: Option<Duration>,
    pub write_delay: Option<Duration>,
    /// Closing the source handle hangs for this long.
    pub close_delay: Option<Duration>,
}

/// Source table of `rows` rows with columns `id, name`.
pub(crate) fn sample_rows(rows: usize) -> Vec<Row> {
    (1..=rows)
        .map(|i| vec![SqlValue::I64(i as i64), SqlValue::Text(format!("row-{}", i))])
        .collect()
}

pub(crate) fn conn(host: &str) -> ConnectionConfig {
    ConnectionConfig::new(host, "shop", "migrator", "secret")
}

#[derive(Debug, Clone)]
pub(crate) struct MemoryProvider {
    columns: Vec<String>,
    rows: Arc<Vec<Row>>,
    pub faults: Faults,
    pub probe: Probe,
}

impl MemoryProvider {
    pub fn with_rows(rows: usize) -> Self {
        Self {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: Arc::new(sample_rows(rows)),
            faults: Faults::default(),
            probe: Probe::default(),
        }
    }

    pub fn faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn source(&self) -> MemorySource {
        MemorySource {
            columns: self.columns.clone(),
            rows: Arc::clone(&self.rows),
            faults: self.faults.clone(),
            probe: self.probe.clone(),
            cursor: None,
            fetches: 0,
        }
    }

    pub fn target(&self) -> MemoryTarget {
        MemoryTarget {
            faults: self.faults.clone(),
            probe: self.probe.clone(),
        }
    }
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    type Source = MemorySource;
    type Target = MemoryTarget;

    async fn connect_source(&self, config: &ConnectionConfig) -> Result<MemorySource> {
        if let Some(delay) = self.faults.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.connect_source {
            return Err(MigrateError::connection(
                config.endpoint(),
                "password authentication failed",
            ));
        }
        self.probe.update(|p| p.source_opened += 1);
        Ok(self.source())
    }

    async fn connect_target(&self, config: &ConnectionConfig) -> Result<MemoryTarget> {
        if self.faults.connect_target {
            return Err(MigrateError::connection(
                config.endpoint(),
                "database \"shop\" does not exist",
            ));
        }
        self.probe.update(|p| p.target_opened += 1);
        Ok(self.target())
    }
}

pub(crate) struct MemorySource {
    columns: Vec<String>,
    rows: Arc<Vec<Row>>,
    faults: Faults,
    probe: Probe,
    cursor: Option<usize>,
    fetches: usize,
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn column_order(&mut self, table: &TableIdentity) -> Result<ColumnOrder> {
        if self.faults.columns {
            return Err(MigrateError::schema(
                table.to_string(),
                "table not found in information_schema.columns",
            ));
        }
        ColumnOrder::from_catalog(table, self.columns.clone())
    }

    async fn open_scan(&mut self, _table: &TableIdentity, _columns: &ColumnOrder) -> Result<()> {
        self.cursor = Some(0);
        self.probe.update(|p| p.scans_opened += 1);
        Ok(())
    }

    async fn fetch_rows(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        if let Some(delay) = self.faults.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        let Some(pos) = self.cursor else {
            return Err(MigrateError::read("memory", "fetch without an open scan"));
        };
        if self.faults.read_after_fetches.is_some_and(|n| self.fetches >= n) {
            return Err(MigrateError::read("memory", "server closed the connection unexpectedly"));
        }
        self.fetches += 1;

        let end = (pos + max_rows).min(self.rows.len());
        let rows = self.rows[pos..end].to_vec();
        self.cursor = Some(end);
        self.probe.update(|p| p.fetch_sizes.push(rows.len()));
        Ok(rows)
    }

    async fn close_scan(&mut self) -> Result<()> {
        if self.cursor.take().is_some() {
            self.probe.update(|p| p.scans_closed += 1);
        }
        Ok(())
    }

    async fn row_count(&mut self, _table: &TableIdentity) -> Result<i64> {
        Ok(self.rows.len() as i64)
    }

    async fn close(self) -> Result<()> {
        if let Some(delay) = self.faults.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.probe.update(|p| p.source_closed += 1);
        Ok(())
    }
}

pub(crate) struct MemoryTarget {
    faults: Faults,
    probe: Probe,
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn write_batch(
        &mut self,
        _table: &TableIdentity,
        columns: &ColumnOrder,
        batch: &RowBatch,
    ) -> Result<u64> {
        self.probe.update(|p| p.attempted_chunks.push(batch.index));
        if let Some(delay) = self.faults.write_delay {
            tokio::time::sleep(delay).await;
        }

        // Rows go into a pending buffer that only becomes visible on commit.
        let mut pending = Vec::with_capacity(batch.len());
        for (pos, row) in batch.rows.iter().enumerate() {
            if self.faults.write_chunks.contains(&batch.index) && pos == self.faults.write_at_row
            {
                return Err(MigrateError::write(
                    batch.index,
                    batch.len(),
                    "duplicate key value violates unique constraint \"orders_pkey\"",
                ));
            }
            if row.len() != columns.len() {
                return Err(MigrateError::write(batch.index, batch.len(), "column count mismatch"));
            }
            pending.push(row.clone());
        }

        let count = pending.len() as u64;
        self.probe.update(|p| p.committed.extend(pending));
        Ok(count)
    }

    async fn row_count(&mut self, _table: &TableIdentity) -> Result<i64> {
        Ok(self.probe.get(|p| p.committed.len()) as i64)
    }

    async fn close(self) -> Result<()> {
        self.probe.update(|p| p.target_closed += 1);
        Ok(())
    }
}

/// Log lines recorded by [`capture_logs`].
#[derive(Debug, Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<(Level, String)>>>);

impl CapturedLogs {
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }
}

struct CaptureLayer(CapturedLogs);

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        (self.0).0
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.message));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={:?}", field.name(), value);
        }
    }
}

/// Record every event on the current thread until the guard is dropped.
///
/// Works with `#[tokio::test]`, which runs on a current-thread runtime.
pub(crate) fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(CaptureLayer(logs.clone()));
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
