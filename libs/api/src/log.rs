use std::future::Future;
use std::pin::Pin;

use crate::ConnectorError;

/// One entry of a partitioned, durable log topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Position the log assigned to an appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogAck {
    pub partition: u32,
    pub offset: u64,
}

/// Producer side of the log broker.
pub trait LogProducer: Send + Sync {
    /// Append a record. Records with the same key land on the same partition.
    fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<LogAck, ConnectorError>> + Send + '_>>;
}

/// Consumer callback. Offsets are committed only after the handler
/// returns, whatever the result.
pub trait RecordHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        record: &'a LogRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + 'a>>;

    /// Handle consecutive records of one partition. Returns the failed
    /// records as `(index_in_records, error)`.
    ///
    /// The default calls `handle` once per record.
    fn handle_batch<'a>(
        &'a self,
        records: &'a [LogRecord],
    ) -> Pin<Box<dyn Future<Output = Vec<(usize, ConnectorError)>> + Send + 'a>> {
        Box::pin(async move {
            let mut failed = Vec::new();
            for (i, record) in records.iter().enumerate() {
                if let Err(e) = self.handle(record).await {
                    failed.push((i, e));
                }
            }
            failed
        })
    }
}
