use std::time::Duration;

use serde::Deserialize;

use sensorgate_api::{OverflowPolicy, Qos};

// ═══════════════════════════════════════════════════════════════
//  Topics Config
// ═══════════════════════════════════════════════════════════════

/// Inputs of the topic set: `prefix/device/suffix` for every
/// (suffix, device) pair.
///
/// Fields are optional on purpose: a missing key is reported as a
/// configuration error when the topic set is built, not as a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicsConfig {
    pub prefix: Option<String>,
    pub suffixes: Option<Vec<String>>,
    pub device_ids: Option<Vec<String>>,
}

// ═══════════════════════════════════════════════════════════════
//  Bridge Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Log topic the bridge publishes measurements to.
    #[serde(default = "default_log_topic")]
    pub log_topic: String,
    #[serde(default)]
    pub qos: Qos,
    /// Inbound queue size per subscription.
    #[serde(default = "default_bridge_buffer")]
    pub buffer: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// Attempts per log publish, first one included.
    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,
    #[serde(default = "default_publish_backoff_ms")]
    pub publish_backoff_ms: u64,
}

impl BridgeConfig {
    pub fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_topic: default_log_topic(),
            qos: Qos::default(),
            buffer: default_bridge_buffer(),
            overflow: OverflowPolicy::default(),
            publish_max_attempts: default_publish_max_attempts(),
            publish_backoff_ms: default_publish_backoff_ms(),
        }
    }
}

pub fn default_log_topic() -> String {
    "measurements".into()
}
fn default_bridge_buffer() -> usize {
    1024
}
fn default_publish_max_attempts() -> u32 {
    3
}
fn default_publish_backoff_ms() -> u64 {
    500
}

// ═══════════════════════════════════════════════════════════════
//  Writer Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    /// Consumer group id on the log.
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Number of concurrent partition workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Max rows per store transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_group_id() -> String {
    "sensorgate-writer".into()
}
fn default_concurrency() -> usize {
    3
}
fn default_batch_size() -> usize {
    500
}
