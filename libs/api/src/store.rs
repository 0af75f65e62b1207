use std::future::Future;
use std::pin::Pin;

use crate::{ConnectorError, Measurement};

/// Time-series storage for measurements.
///
/// Rows are keyed by `(channel_id, timestamp)`; writing the same key again
/// overwrites the value.
pub trait TimeSeriesStore: Send + Sync {
    /// Prepare the backend (connect, create tables).
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>>;

    /// Insert all rows or none of them. Returns the number of rows written.
    fn insert_batch<'a>(
        &'a self,
        rows: &'a [Measurement],
    ) -> Pin<Box<dyn Future<Output = Result<u64, ConnectorError>> + Send + 'a>>;
}
