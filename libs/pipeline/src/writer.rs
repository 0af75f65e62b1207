use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sensorgate_api::{ConnectorError, LogRecord, Measurement, RecordHandler, TimeSeriesStore};

use crate::codec;
use crate::metrics::PipelineCounters;
use crate::retry::RetryPolicy;
use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  BatchResult
// ═══════════════════════════════════════════════════════════════

/// Per-element outcome of a batch write.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// Number of elements written.
    pub succeeded: usize,
    /// Number of elements that failed.
    pub failed: usize,
    /// Per-element errors: `(index_in_batch, error)`.
    pub errors: Vec<(usize, PipelineError)>,
}

impl BatchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, index: usize, error: PipelineError) {
        self.failed += 1;
        self.errors.push((index, error));
    }

    pub fn is_all_ok(&self) -> bool {
        self.failed == 0
    }

    /// Fold `other` in, shifting its indices through `index_map`.
    fn merge_mapped(&mut self, other: BatchResult, index_map: &[usize]) {
        self.succeeded += other.succeeded;
        for (i, e) in other.errors {
            self.record_failure(index_map.get(i).copied().unwrap_or(i), e);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  BatchWriter: log → store
// ═══════════════════════════════════════════════════════════════

/// Decodes log records and writes them to the store in bounded chunks.
///
/// Stateless between calls: every invocation owns its batch, so the
/// writer is safe to share across consumer workers.
pub struct BatchWriter {
    store: Arc<dyn TimeSeriesStore>,
    counters: Arc<PipelineCounters>,
    batch_size: usize,
    policy: RetryPolicy,
}

impl BatchWriter {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        counters: Arc<PipelineCounters>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            counters,
            batch_size: batch_size.max(1),
            policy: RetryPolicy::store(),
        }
    }

    /// Handle one log record: decode and write it.
    pub async fn consume(&self, record: &LogRecord) -> Result<(), PipelineError> {
        let m = codec::decode_record(&record.payload).inspect_err(|_| self.counters.inc_decode())?;
        let mut result = self.batch_insert(std::slice::from_ref(&m)).await;
        match result.errors.pop() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    /// Decode and write a batch of records. Indices in the result refer to
    /// positions in `records`.
    pub async fn consume_batch(&self, records: &[LogRecord]) -> BatchResult {
        let mut result = BatchResult::empty();
        let mut decoded = Vec::with_capacity(records.len());
        let mut index_map = Vec::with_capacity(records.len());

        for (i, record) in records.iter().enumerate() {
            match codec::decode_record(&record.payload) {
                Ok(m) => {
                    decoded.push(m);
                    index_map.push(i);
                }
                Err(e) => {
                    self.counters.inc_decode();
                    tracing::warn!(
                        topic = %record.topic, partition = record.partition,
                        offset = record.offset, error = %e,
                        "undecodable record",
                    );
                    result.record_failure(i, e);
                }
            }
        }

        let inserted = self.batch_insert(&decoded).await;
        result.merge_mapped(inserted, &index_map);
        result
    }

    /// Write measurements in chunks of at most `batch_size` rows.
    ///
    /// Transient store errors are retried per chunk (3 attempts, 20 s
    /// apart). A chunk rejected by a permanent error is replayed row by row
    /// so one bad row does not fail its neighbours.
    pub async fn batch_insert(&self, measurements: &[Measurement]) -> BatchResult {
        let mut result = BatchResult::empty();

        for (n, chunk) in measurements.chunks(self.batch_size).enumerate() {
            let base = n * self.batch_size;
            match self.insert_chunk(chunk).await {
                Ok(_) => chunk.iter().for_each(|_| result.record_success()),
                Err(e @ PipelineError::Store(_)) if chunk.len() > 1 => {
                    tracing::warn!(rows = chunk.len(), error = %e, "chunk rejected, writing rows one by one");
                    for (i, row) in chunk.iter().enumerate() {
                        match self.insert_chunk(std::slice::from_ref(row)).await {
                            Ok(_) => result.record_success(),
                            Err(e) => {
                                tracing::error!(channel = %row.channel_id(), error = %e, "row rejected");
                                result.record_failure(base + i, e);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(rows = chunk.len(), error = %e, "chunk write failed");
                    for i in 0..chunk.len() {
                        result.record_failure(base + i, e.clone());
                    }
                }
            }
        }

        self.counters.add_persisted(result.succeeded as u64);
        self.counters.add_store_failed(result.failed as u64);
        if !measurements.is_empty() {
            tracing::debug!(rows = measurements.len(), succeeded = result.succeeded, failed = result.failed, "batch written");
        }
        result
    }

    async fn insert_chunk(&self, rows: &[Measurement]) -> Result<u64, PipelineError> {
        self.policy
            .run_with(
                || self.store.insert_batch(rows),
                |e| e.is_transient(),
                |_, _| self.counters.inc_store_transient(),
            )
            .await
            .map_err(|ex| {
                if ex.error.is_transient() {
                    PipelineError::StoreRetriesExhausted { attempts: ex.attempts, source: ex.error }
                } else {
                    PipelineError::Store(ex.error)
                }
            })
    }
}

impl RecordHandler for BatchWriter {
    fn handle<'a>(
        &'a self,
        record: &'a LogRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + 'a>> {
        Box::pin(async move {
            self.consume(record)
                .await
                .map_err(PipelineError::into_connector_error)
        })
    }

    fn handle_batch<'a>(
        &'a self,
        records: &'a [LogRecord],
    ) -> Pin<Box<dyn Future<Output = Vec<(usize, ConnectorError)>> + Send + 'a>> {
        Box::pin(async move {
            self.consume_batch(records)
                .await
                .errors
                .into_iter()
                .map(|(i, e)| (i, e.into_connector_error()))
                .collect()
        })
    }
}
