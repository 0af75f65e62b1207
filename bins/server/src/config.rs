use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use sensorgate_pipeline::config::{BridgeConfig, TopicsConfig, WriterConfig};
use sensorgate_storage_memory::MemoryStoreConfig;
use sensorgate_storage_timescale::TimescaleConfig;
use sensorgate_transport_mqtt::MqttConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "sensorgate-server", about = "MQTT → log → TimescaleDB ingestion service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingestion pipeline
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// How long shutdown waits for in-flight work before aborting tasks.
    #[serde(default = "default_drain_secs")]
    pub drain_secs: u64,
    /// Period of the counters log line; 0 disables it.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_drain_secs() -> u64 {
    5
}
fn default_stats_interval_secs() -> u64 {
    60
}

/// Embedded partitioned log.
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Records kept per partition.
    #[serde(default = "default_retention")]
    pub retention: usize,
    /// Segment files and committed offsets live here; unset keeps the log
    /// in memory only.
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            retention: default_retention(),
            data_dir: None,
        }
    }
}

fn default_partitions() -> u32 {
    3
}
fn default_retention() -> usize {
    100_000
}

#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory(MemoryStoreConfig),
    Timescale(TimescaleConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(MemoryStoreConfig::default())
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
