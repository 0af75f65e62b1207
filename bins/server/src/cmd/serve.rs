use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ServeArgs, ServerConfig, StorageConfig};
use crate::error::ServerError;
use sensorgate_api::{PubSubBroker, TimeSeriesStore};
use sensorgate_pipeline::{
    BatchWriter, ConnectionManager, IngestBridge, PipelineCounters, topic_names_from_config,
};
use sensorgate_storage_memory::MemoryStore;
use sensorgate_storage_timescale::TimescaleStore;
use sensorgate_topic_engine::PartitionedLog;
use sensorgate_transport_mqtt::MqttBroker;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("sensorgate-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    let topics = topic_names_from_config(&config.topics)?;
    if topics.is_empty() {
        tracing::warn!("topic set is empty, nothing will be bridged");
    }

    // --- CancellationTokens for graceful shutdown: intake stops first ---
    let bridge_token = CancellationToken::new();
    let writer_token = CancellationToken::new();
    let counters = Arc::new(PipelineCounters::new());
    let mut bridge_handles: Vec<JoinHandle<()>> = Vec::new();
    let mut writer_handles: Vec<JoinHandle<()>> = Vec::new();

    // --- Storage ---
    let store: Arc<dyn TimeSeriesStore> = match &config.storage {
        StorageConfig::Memory(cfg) => Arc::new(MemoryStore::from_config(cfg)),
        StorageConfig::Timescale(cfg) => Arc::new(TimescaleStore::new(cfg)?),
    };
    store.init().await?;

    // --- Log + writer (consumer side first so nothing waits on it) ---
    let log = match &config.log.data_dir {
        Some(dir) => PartitionedLog::open(dir, config.log.partitions, config.log.retention)?,
        None => {
            tracing::warn!("log.data_dir not set, unconsumed records are lost on exit");
            PartitionedLog::new(config.log.partitions, config.log.retention)?
        }
    };
    let log = Arc::new(log);
    let writer = Arc::new(BatchWriter::new(store, counters.clone(), config.writer.batch_size));
    writer_handles.extend(
        log.spawn_consumers(
            &config.bridge.log_topic,
            &config.writer.group_id,
            config.writer.concurrency,
            config.writer.batch_size,
            writer,
            writer_token.clone(),
        )
        .await?,
    );
    tracing::info!(
        log_topic = %config.bridge.log_topic,
        group = %config.writer.group_id,
        concurrency = config.writer.concurrency,
        batch_size = config.writer.batch_size,
        "writer started"
    );

    // --- Broker + bridge ---
    let broker: Arc<dyn PubSubBroker> = Arc::new(MqttBroker::new(config.mqtt.clone()));
    let connection = Arc::new(ConnectionManager::new(broker));
    tracing::info!(client_id = %connection.client_id(), host = %config.mqtt.host, port = config.mqtt.port, "mqtt client created");

    let bridge = Arc::new(IngestBridge::new(
        connection.clone(),
        log.clone(),
        counters.clone(),
        config.bridge.clone(),
    ));
    bridge_handles.extend(bridge.start(&topics, bridge_token.clone()).await?);

    // --- Periodic counters ---
    if config.stats_interval_secs > 0 {
        let counters = counters.clone();
        let t = writer_token.clone();
        let period = Duration::from_secs(config.stats_interval_secs);
        writer_handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let s = counters.snapshot();
                        tracing::info!(bridged = s.bridged, persisted = s.persisted, failures = s.failures(), "pipeline stats");
                    }
                    _ = t.cancelled() => break,
                }
            }
        }));
    }

    tracing::info!(topics = topics.len(), "server ready");

    // --- Wait for Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    // Drain within drain_secs: stop intake, let the writer catch up with
    // the log, then stop the writer. Whatever is still uncommitted at the
    // deadline is replayed on the next start with a data_dir, lost without.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(config.drain_secs);

    bridge_token.cancel();
    join_until(&mut bridge_handles, deadline).await;

    let caught_up = tokio::time::timeout_at(deadline, async {
        while log.lag(&config.writer.group_id, &config.bridge.log_topic).await > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if caught_up.is_err() {
        let lag = log.lag(&config.writer.group_id, &config.bridge.log_topic).await;
        tracing::warn!(drain_secs = config.drain_secs, lag, "writer did not catch up before the drain deadline");
    }

    writer_token.cancel();
    join_until(&mut writer_handles, deadline).await;

    if let Err(e) = connection.disconnect().await {
        tracing::error!(error = %e, "broker disconnect error");
    }

    for (topic, state) in bridge.states().await {
        tracing::debug!(topic = %topic, state = %state, "final subscription state");
    }

    let snapshot = counters.snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => tracing::info!(counters = %json, "shutdown complete"),
        Err(_) => tracing::info!(counters = ?snapshot, "shutdown complete"),
    }
    Ok(())
}

/// Await `handles` until `deadline`, then abort the ones still running.
async fn join_until(handles: &mut [JoinHandle<()>], deadline: tokio::time::Instant) {
    let joined = tokio::time::timeout_at(deadline, async {
        for h in handles.iter_mut() {
            let _ = h.await;
        }
    })
    .await;
    if joined.is_err() {
        tracing::warn!("drain timed out, aborting remaining tasks");
        for h in handles.iter() {
            if !h.is_finished() {
                h.abort();
            }
        }
    }
}
