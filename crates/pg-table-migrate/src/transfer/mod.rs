//! Chunked transfer primitives.
//!
//! - [`ChunkReader`]: lazily turns one forward-only source scan into
//!   [`RowBatch`]es of at most `chunk_size` rows
//! - [`ChunkWriter`]: writes one batch into the target, all or nothing
//!
//! Neither type retries. The orchestrator decides what a failure means.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, Stream};
use tracing::{debug, info, warn};

use crate::core::schema::{ColumnOrder, TableIdentity};
use crate::core::traits::{SourceReader, TargetWriter};
use crate::core::value::RowBatch;
use crate::error::{MigrateError, Result};

/// Await `fut`, failing with `on_timeout` if it takes longer than `limit`.
///
/// The future is dropped on timeout.
pub(crate) async fn with_timeout<T, F>(
    limit: Option<Duration>,
    fut: F,
    on_timeout: impl FnOnce(Duration) -> MigrateError,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        },
        None => fut.await,
    }
}

/// Lazy, finite, non-restartable sequence of row batches over one table.
pub struct ChunkReader<'a, R: SourceReader> {
    source: &'a mut R,
    table: TableIdentity,
    chunk_size: usize,
    fetch_timeout: Option<Duration>,
    next_index: u64,
    exhausted: bool,
}

impl<'a, R: SourceReader> ChunkReader<'a, R> {
    /// Open a scan of `table` projecting `columns`.
    ///
    /// Fails with `MigrateError::Config` when `chunk_size` is zero.
    pub async fn open(
        source: &'a mut R,
        table: &TableIdentity,
        columns: &ColumnOrder,
        chunk_size: usize,
        fetch_timeout: Option<Duration>,
    ) -> Result<ChunkReader<'a, R>> {
        if chunk_size == 0 {
            return Err(MigrateError::Config(
                "chunk_size must be at least 1".to_string(),
            ));
        }

        let table_name = table.to_string();
        with_timeout(fetch_timeout, source.open_scan(table, columns), |limit| {
            MigrateError::read(
                table_name,
                format!("opening scan timed out after {:?}", limit),
            )
        })
        .await?;

        debug!("Opened scan of {} ({} rows per chunk)", table, chunk_size);

        Ok(Self {
            source,
            table: table.clone(),
            chunk_size,
            fetch_timeout,
            next_index: 1,
            exhausted: false,
        })
    }

    /// Next batch, or `None` once every row has been delivered.
    ///
    /// Batches are numbered from 1. A short batch is always the last one.
    /// After an error or after `None` the reader stays exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<RowBatch>> {
        if self.exhausted {
            return Ok(None);
        }

        let table_name = self.table.to_string();
        let fetched = with_timeout(
            self.fetch_timeout,
            self.source.fetch_rows(self.chunk_size),
            |limit| {
                MigrateError::read(
                    table_name,
                    format!("chunk fetch timed out after {:?}", limit),
                )
            },
        )
        .await;

        let rows = match fetched {
            Ok(rows) => rows,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };

        if rows.len() > self.chunk_size {
            self.exhausted = true;
            return Err(MigrateError::read(
                self.table.to_string(),
                format!(
                    "source returned {} rows for a chunk of {}",
                    rows.len(),
                    self.chunk_size
                ),
            ));
        }

        if rows.len() < self.chunk_size {
            self.finish_scan().await?;
        }

        if rows.is_empty() {
            return Ok(None);
        }

        let batch = RowBatch::new(self.next_index, rows);
        self.next_index += 1;
        Ok(Some(batch))
    }

    /// Consume the reader as a stream of batches.
    pub fn into_stream(self) -> impl Stream<Item = Result<RowBatch>> + 'a {
        stream::try_unfold(self, |mut reader| async move {
            let next = reader.next_chunk().await?;
            Ok::<_, MigrateError>(next.map(|batch| (batch, reader)))
        })
    }

    /// Abandon the scan early. Safe to call on an exhausted reader.
    pub async fn close(mut self) -> Result<()> {
        if !self.exhausted {
            self.finish_scan().await?;
        }
        Ok(())
    }

    async fn finish_scan(&mut self) -> Result<()> {
        self.exhausted = true;
        self.source.close_scan().await
    }
}

/// Writes batches into one target table.
pub struct ChunkWriter<'a, W: TargetWriter> {
    target: &'a mut W,
    table: &'a TableIdentity,
    columns: &'a ColumnOrder,
    commit_timeout: Option<Duration>,
}

impl<'a, W: TargetWriter> ChunkWriter<'a, W> {
    pub fn new(
        target: &'a mut W,
        table: &'a TableIdentity,
        columns: &'a ColumnOrder,
        commit_timeout: Option<Duration>,
    ) -> Self {
        Self {
            target,
            table,
            columns,
            commit_timeout,
        }
    }

    /// Insert and commit one batch.
    ///
    /// Every failure comes back as `MigrateError::Write` carrying the chunk
    /// index, its row count and the cause. Nothing from a failed batch is
    /// left in the target.
    pub async fn write(&mut self, batch: &RowBatch) -> Result<u64> {
        info!(
            "Chunk {} started: {} rows into {}",
            batch.index,
            batch.len(),
            self.table
        );

        let written = with_timeout(
            self.commit_timeout,
            self.target.write_batch(self.table, self.columns, batch),
            |limit| {
                MigrateError::write(
                    batch.index,
                    batch.len(),
                    format!("insert and commit timed out after {:?}", limit),
                )
            },
        )
        .await;

        match written {
            Ok(rows) => {
                if rows != batch.len() as u64 {
                    warn!(
                        "Chunk {} committed {} rows but the batch held {}",
                        batch.index,
                        rows,
                        batch.len()
                    );
                }
                info!("Chunk {} committed: {} rows", batch.index, rows);
                Ok(rows)
            }
            Err(e @ MigrateError::Write { .. }) => Err(e),
            Err(e) => Err(MigrateError::write(batch.index, batch.len(), e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use futures::TryStreamExt;

    use super::*;
    use crate::test_support::{Faults, MemoryProvider};

    fn orders() -> TableIdentity {
        TableIdentity::new("public", "orders")
    }

    fn columns() -> ColumnOrder {
        ColumnOrder::from_catalog(&orders(), vec!["id".into(), "name".into()]).unwrap()
    }

    async fn chunk_sizes(rows: usize, chunk_size: usize) -> Vec<usize> {
        let provider = MemoryProvider::with_rows(rows);
        let mut source = provider.source();
        let mut reader = ChunkReader::open(&mut source, &orders(), &columns(), chunk_size, None)
            .await
            .unwrap();
        let mut sizes = Vec::new();
        while let Some(batch) = reader.next_chunk().await.unwrap() {
            sizes.push(batch.len());
        }
        sizes
    }

    #[tokio::test]
    async fn test_chunk_count_is_ceiling_of_rows_over_chunk_size() {
        assert_eq!(chunk_sizes(1200, 500).await, vec![500, 500, 200]);
        assert_eq!(chunk_sizes(1000, 500).await, vec![500, 500]);
        assert_eq!(chunk_sizes(1, 500).await, vec![1]);
        assert_eq!(chunk_sizes(7, 3).await, vec![3, 3, 1]);

        for (rows, size) in [(0usize, 1usize), (9, 4), (10, 10), (11, 10), (99, 7)] {
            let sizes = chunk_sizes(rows, size).await;
            assert_eq!(sizes.len(), rows.div_ceil(size), "rows={} size={}", rows, size);
            assert_eq!(sizes.iter().sum::<usize>(), rows);
            if let Some(last) = sizes.last() {
                let expected = if rows % size == 0 { size } else { rows % size };
                assert_eq!(*last, expected);
            }
        }
    }

    #[tokio::test]
    async fn test_empty_table_yields_no_chunks() {
        assert!(chunk_sizes(0, 500).await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_chunk_size_is_config_error() {
        let provider = MemoryProvider::with_rows(10);
        let mut source = provider.source();
        let err = ChunkReader::open(&mut source, &orders(), &columns(), 0, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MigrateError::Config(_)));
        assert_eq!(provider.probe.get(|p| p.scans_opened), 0);
    }

    #[tokio::test]
    async fn test_batches_are_numbered_and_cover_table_once() {
        let provider = MemoryProvider::with_rows(12);
        let mut source = provider.source();
        let reader = ChunkReader::open(&mut source, &orders(), &columns(), 5, None)
            .await
            .unwrap();
        let batches: Vec<RowBatch> = reader.into_stream().try_collect().await.unwrap();

        assert_eq!(batches.iter().map(|b| b.index).collect::<Vec<_>>(), vec![1, 2, 3]);
        let all: Vec<_> = batches.into_iter().flat_map(|b| b.rows).collect();
        assert_eq!(all, crate::test_support::sample_rows(12));
    }

    #[tokio::test]
    async fn test_reader_is_not_restartable() {
        let provider = MemoryProvider::with_rows(4);
        let mut source = provider.source();
        let mut reader = ChunkReader::open(&mut source, &orders(), &columns(), 10, None)
            .await
            .unwrap();
        assert_eq!(reader.next_chunk().await.unwrap().unwrap().len(), 4);
        assert_eq!(provider.probe.get(|p| p.scans_closed), 1);
        assert!(reader.next_chunk().await.unwrap().is_none());
        assert!(reader.next_chunk().await.unwrap().is_none());
        // The short batch ended the scan; no extra fetch was issued.
        assert_eq!(provider.probe.get(|p| p.fetch_sizes.clone()), vec![4]);
    }

    #[tokio::test]
    async fn test_read_failure_is_read_error_and_final() {
        let provider = MemoryProvider::with_rows(100).faults(Faults {
            read_after_fetches: Some(1),
            ..Faults::default()
        });
        let mut source = provider.source();
        let mut reader = ChunkReader::open(&mut source, &orders(), &columns(), 10, None)
            .await
            .unwrap();
        assert!(reader.next_chunk().await.unwrap().is_some());
        let err = reader.next_chunk().await.unwrap_err();
        assert!(matches!(err, MigrateError::Read { .. }));
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_read_error() {
        let provider = MemoryProvider::with_rows(10).faults(Faults {
            fetch_delay: Some(Duration::from_secs(5)),
            ..Faults::default()
        });
        let mut source = provider.source();
        let mut reader = ChunkReader::open(
            &mut source,
            &orders(),
            &columns(),
            10,
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap();
        let err = reader.next_chunk().await.unwrap_err();
        assert!(matches!(err, MigrateError::Read { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_writer_commits_whole_batch() {
        let provider = MemoryProvider::with_rows(0);
        let mut target = provider.target();
        let table = TableIdentity::new("archive", "orders");
        let cols = columns();
        let mut writer = ChunkWriter::new(&mut target, &table, &cols, None);

        let batch = RowBatch::new(1, crate::test_support::sample_rows(3));
        assert_eq!(writer.write(&batch).await.unwrap(), 3);
        assert_eq!(provider.probe.get(|p| p.committed.len()), 3);
    }

    #[tokio::test]
    async fn test_writer_failure_mid_batch_leaves_nothing() {
        let provider = MemoryProvider::with_rows(0).faults(Faults {
            write_chunks: HashSet::from([2]),
            write_at_row: 3,
            ..Faults::default()
        });
        let mut target = provider.target();
        let table = TableIdentity::new("archive", "orders");
        let cols = columns();
        let mut writer = ChunkWriter::new(&mut target, &table, &cols, None);

        let batch = RowBatch::new(2, crate::test_support::sample_rows(5));
        let err = writer.write(&batch).await.unwrap_err();
        match err {
            MigrateError::Write {
                chunk_index, rows, ..
            } => {
                assert_eq!(chunk_index, 2);
                assert_eq!(rows, 5);
            }
            other => panic!("expected write error, got {:?}", other),
        }
        assert_eq!(provider.probe.get(|p| p.committed.len()), 0);
        assert_eq!(provider.probe.get(|p| p.attempted_chunks.clone()), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_timeout_is_write_error() {
        let provider = MemoryProvider::with_rows(0).faults(Faults {
            write_delay: Some(Duration::from_secs(30)),
            ..Faults::default()
        });
        let mut target = provider.target();
        let table = TableIdentity::new("archive", "orders");
        let cols = columns();
        let mut writer = ChunkWriter::new(&mut target, &table, &cols, Some(Duration::from_secs(2)));

        let batch = RowBatch::new(4, crate::test_support::sample_rows(2));
        let err = writer.write(&batch).await.unwrap_err();
        assert!(matches!(err, MigrateError::Write { chunk_index: 4, rows: 2, .. }));
        assert_eq!(provider.probe.get(|p| p.committed.len()), 0);
    }
}
