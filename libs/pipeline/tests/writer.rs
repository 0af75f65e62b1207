use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::Instant;

use sensorgate_api::{ConnectorError, LogRecord, Measurement, RecordHandler, TimeSeriesStore};
use sensorgate_pipeline::{codec, BatchWriter, PipelineCounters, PipelineError};

/// Store double: fails the first `transient_failures` calls with an I/O
/// error and rejects any batch containing `poison` permanently.
#[derive(Default)]
struct ScriptedStore {
    transient_failures: u32,
    poison: Option<String>,
    calls: AtomicU32,
    rows: Mutex<Vec<Measurement>>,
}

impl TimeSeriesStore for ScriptedStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn insert_batch<'a>(
        &'a self,
        rows: &'a [Measurement],
    ) -> Pin<Box<dyn Future<Output = Result<u64, ConnectorError>> + Send + 'a>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.transient_failures {
                return Err(ConnectorError::io("connection reset"));
            }
            if let Some(p) = &self.poison {
                if rows.iter().any(|m| m.channel_id() == p) {
                    return Err(ConnectorError::new("check constraint violated"));
                }
            }
            self.rows.lock().await.extend_from_slice(rows);
            Ok(rows.len() as u64)
        })
    }
}

fn m(channel: &str, secs: i64, value: &str) -> Measurement {
    Measurement::new(
        channel,
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        Decimal::from_str(value).unwrap(),
    )
    .unwrap()
}

fn record(offset: u64, payload: Vec<u8>) -> LogRecord {
    LogRecord { topic: "measurements".into(), partition: 0, offset, key: None, payload }
}

#[tokio::test(start_paused = true)]
async fn transient_errors_retry_three_times_twenty_seconds_apart() {
    let store = Arc::new(ScriptedStore { transient_failures: u32::MAX, ..Default::default() });
    let counters = Arc::new(PipelineCounters::new());
    let writer = BatchWriter::new(store.clone(), counters.clone(), 100);

    let start = Instant::now();
    let result = writer.batch_insert(&[m("A-TEMP", 0, "21.5"), m("A-HUM", 0, "40")]).await;
    let elapsed = start.elapsed();

    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41), "{elapsed:?}");
    assert_eq!(result.failed, 2);
    assert!(result
        .errors
        .iter()
        .all(|(_, e)| matches!(e, PipelineError::StoreRetriesExhausted { attempts: 3, .. })));

    let s = counters.snapshot();
    assert_eq!(s.store_transient, 2);
    assert_eq!(s.store_failed, 2);
    assert_eq!(s.persisted, 0);
}

#[tokio::test(start_paused = true)]
async fn recovers_when_store_comes_back() {
    let store = Arc::new(ScriptedStore { transient_failures: 2, ..Default::default() });
    let counters = Arc::new(PipelineCounters::new());
    let writer = BatchWriter::new(store.clone(), counters.clone(), 100);

    let result = writer.batch_insert(&[m("A-TEMP", 0, "21.5")]).await;
    assert!(result.is_all_ok());
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.rows.lock().await.len(), 1);
    assert_eq!(counters.snapshot().persisted, 1);
}

#[tokio::test]
async fn permanent_error_on_single_row_is_not_retried() {
    let store = Arc::new(ScriptedStore { poison: Some("BAD".into()), ..Default::default() });
    let writer = BatchWriter::new(store.clone(), Arc::new(PipelineCounters::new()), 100);

    let result = writer.batch_insert(&[m("BAD", 0, "1")]).await;
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.failed, 1);
    assert!(matches!(result.errors[0], (0, PipelineError::Store(_))));
}

#[tokio::test]
async fn rejected_chunk_is_replayed_row_by_row() {
    let store = Arc::new(ScriptedStore { poison: Some("BAD".into()), ..Default::default() });
    let counters = Arc::new(PipelineCounters::new());
    let writer = BatchWriter::new(store.clone(), counters.clone(), 2);

    let rows = [m("A", 0, "1"), m("B", 0, "2"), m("BAD", 0, "3"), m("C", 0, "4")];
    let result = writer.batch_insert(&rows).await;

    // chunk [A, B] ok; chunk [BAD, C] rejected, then BAD and C alone
    assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    assert_eq!(result.succeeded, 3);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors[0].0, 2);

    let stored: Vec<String> =
        store.rows.lock().await.iter().map(|m| m.channel_id().to_string()).collect();
    assert_eq!(stored, ["A", "B", "C"]);
    assert_eq!(counters.snapshot().persisted, 3);
}

#[tokio::test]
async fn consume_batch_reports_record_indices() {
    let store = Arc::new(ScriptedStore::default());
    let counters = Arc::new(PipelineCounters::new());
    let writer = BatchWriter::new(store.clone(), counters.clone(), 10);

    let records = vec![
        record(0, codec::encode(&m("A", 0, "1")).unwrap()),
        record(1, b"{not json".to_vec()),
        record(2, codec::encode(&m("B", 0, "2")).unwrap()),
    ];
    let result = writer.consume_batch(&records).await;

    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(matches!(result.errors[0], (1, PipelineError::Decode(_))));
    assert_eq!(counters.snapshot().decode, 1);
}

#[tokio::test]
async fn consume_propagates_decode_errors() {
    let writer = BatchWriter::new(Arc::new(ScriptedStore::default()), Arc::new(PipelineCounters::new()), 10);
    let err = writer.consume(&record(0, b"[]".to_vec())).await.unwrap_err();
    assert!(matches!(err, PipelineError::Decode(_)));
}

#[tokio::test]
async fn record_batches_become_one_store_call() {
    let store = Arc::new(ScriptedStore::default());
    let writer = BatchWriter::new(store.clone(), Arc::new(PipelineCounters::new()), 100);

    let records = vec![
        record(0, codec::encode(&m("A", 0, "1")).unwrap()),
        record(1, codec::encode(&m("B", 0, "2")).unwrap()),
        record(2, b"{not json".to_vec()),
        record(3, codec::encode(&m("C", 0, "3")).unwrap()),
    ];
    let failed = writer.handle_batch(&records).await;

    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.rows.lock().await.len(), 3);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, 2);
}
