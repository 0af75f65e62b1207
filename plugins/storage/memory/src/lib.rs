use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use sensorgate_api::{ConnectorError, Measurement, TimeSeriesStore};

// ═══════════════════════════════════════════════════════════════
//  MemoryStoreConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryStoreConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

type RowKey = (DateTime<Utc>, String);

/// In-memory time-series store. Upserts by (timestamp, channel id) and
/// evicts the oldest rows beyond `max_records`.
///
/// For local runs and tests; nothing survives a restart.
pub struct MemoryStore {
    rows: RwLock<BTreeMap<RowKey, Decimal>>,
    max_records: usize,
}

impl MemoryStore {
    pub fn new(max_records: usize) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            max_records: max_records.max(1),
        }
    }

    pub fn from_config(config: &MemoryStoreConfig) -> Self {
        Self::new(config.max_records)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Rows in `[from, to)` ordered by time, optionally for one channel.
    pub async fn query(
        &self,
        channel_id: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Measurement> {
        let rows = self.rows.read().await;
        rows.iter()
            .filter(|((ts, ch), _)| {
                channel_id.is_none_or(|c| c == ch)
                    && from.is_none_or(|f| *ts >= f)
                    && to.is_none_or(|t| *ts < t)
            })
            .filter_map(|((ts, ch), v)| Measurement::new(ch.clone(), *ts, *v).ok())
            .collect()
    }

    /// Most recent row of a channel.
    pub async fn latest(&self, channel_id: &str) -> Option<Measurement> {
        let rows = self.rows.read().await;
        rows.iter()
            .rev()
            .find(|((_, ch), _)| ch == channel_id)
            .and_then(|((ts, ch), v)| Measurement::new(ch.clone(), *ts, *v).ok())
    }
}

impl TimeSeriesStore for MemoryStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(max_records = self.max_records, "memory store ready");
            Ok(())
        })
    }

    fn insert_batch<'a>(
        &'a self,
        rows: &'a [Measurement],
    ) -> Pin<Box<dyn Future<Output = Result<u64, ConnectorError>> + Send + 'a>> {
        Box::pin(async move {
            let mut buf = self.rows.write().await;
            for m in rows {
                buf.insert((m.timestamp(), m.channel_id().to_string()), m.value());
            }
            while buf.len() > self.max_records {
                buf.pop_first();
            }
            Ok(rows.len() as u64)
        })
    }
}
