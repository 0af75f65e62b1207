use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sensorgate_api::PubSubBroker;
use sensorgate_pipeline::{ConnectionManager, topic_names_from_config};
use sensorgate_transport_mqtt::MqttBroker;

use super::config::Effective;
use super::domain::{Rng, payload_for};
use super::error::GenError;

pub async fn run(args: &Effective) -> Result<(), GenError> {
    let topics = topic_names_from_config(&args.topics)?;
    if topics.is_empty() {
        return Err(GenError::Config("topic set is empty, check [topics]".into()));
    }

    let broker: Arc<dyn PubSubBroker> = Arc::new(MqttBroker::new(args.mqtt.clone()));
    let connection = ConnectionManager::new(broker);
    connection.connect().await?;
    tracing::info!(
        client_id = %connection.client_id(),
        host = %args.mqtt.host,
        topics = topics.len(),
        interval_ms = args.interval_ms,
        "publishing readings"
    );

    let outcome = tokio::select! {
        r = publish_loop(&connection, &topics, args) => r,
        r = tokio::signal::ctrl_c() => r.map(|_| 0).map_err(GenError::from),
    };

    if let Err(e) = connection.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }

    let sent = outcome?;
    tracing::info!(sent, "done");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Publish loop
// ═══════════════════════════════════════════════════════════════

async fn publish_loop(
    connection: &ConnectionManager,
    topics: &BTreeSet<String>,
    args: &Effective,
) -> Result<u64, GenError> {
    let mut rng = Rng::new(args.seed);
    let mut tick = tokio::time::interval(Duration::from_millis(args.interval_ms));
    let mut sent = 0u64;
    let mut round = 0u64;

    while args.iterations == 0 || round < args.iterations {
        tick.tick().await;
        for topic in topics {
            let Some(payload) = payload_for(topic, &mut rng) else {
                continue;
            };
            match connection.broker().publish(topic, payload, args.qos).await {
                Ok(()) => sent += 1,
                Err(e) if e.is_transient() => {
                    tracing::warn!(topic = %topic, error = %e, "publish failed, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        round += 1;
        tracing::debug!(round, sent, "round published");
    }
    Ok(sent)
}
