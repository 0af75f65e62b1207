use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sensorgate_api::{InboundMessage, LogAck, LogProducer, MessageSubscription};

use crate::codec;
use crate::config::BridgeConfig;
use crate::connection::ConnectionManager;
use crate::metrics::PipelineCounters;
use crate::retry::RetryPolicy;
use crate::PipelineError;

/// Per-topic subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionState::Unsubscribed => f.write_str("unsubscribed"),
            SubscriptionState::Subscribing => f.write_str("subscribing"),
            SubscriptionState::Subscribed => f.write_str("subscribed"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  IngestBridge: pub/sub topics → log
// ═══════════════════════════════════════════════════════════════

/// Subscribes to every device topic and republishes decoded measurements
/// on the log, keyed by channel id.
///
/// One subscription and one forwarding task per topic; a failing topic
/// never stops the others.
pub struct IngestBridge {
    connection: Arc<ConnectionManager>,
    producer: Arc<dyn LogProducer>,
    counters: Arc<PipelineCounters>,
    config: BridgeConfig,
    publish_policy: RetryPolicy,
    states: Mutex<BTreeMap<String, SubscriptionState>>,
}

impl IngestBridge {
    pub fn new(
        connection: Arc<ConnectionManager>,
        producer: Arc<dyn LogProducer>,
        counters: Arc<PipelineCounters>,
        config: BridgeConfig,
    ) -> Self {
        let publish_policy =
            RetryPolicy::fixed(config.publish_max_attempts, config.publish_backoff());
        Self {
            connection,
            producer,
            counters,
            config,
            publish_policy,
            states: Mutex::new(BTreeMap::new()),
        }
    }

    /// Connect, then subscribe to every topic and spawn its forwarding task.
    ///
    /// A failed connect is returned; a failed subscribe is logged, counted
    /// and leaves that topic `Unsubscribed`.
    pub async fn start(
        self: &Arc<Self>,
        topics: &BTreeSet<String>,
        token: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, PipelineError> {
        self.connection.connect().await?;

        {
            let mut states = self.states.lock().await;
            for topic in topics {
                states.entry(topic.clone()).or_insert(SubscriptionState::Unsubscribed);
            }
        }

        let mut handles = Vec::with_capacity(topics.len());
        for topic in topics {
            match self.subscribe(topic).await {
                Ok(sub) => handles.push(self.spawn_forwarder(topic.clone(), sub, token.clone())),
                Err(e) => {
                    self.counters.inc_subscription();
                    tracing::error!(topic = %topic, error = %e, "subscribe failed");
                }
            }
        }

        tracing::info!(
            subscribed = handles.len(),
            failed = topics.len() - handles.len(),
            log_topic = %self.config.log_topic,
            "bridge started",
        );
        Ok(handles)
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn MessageSubscription>, PipelineError> {
        self.set_state(topic, SubscriptionState::Subscribing).await;
        let result = self
            .connection
            .broker()
            .subscribe(topic, self.config.qos, self.config.buffer, self.config.overflow)
            .await;
        match result {
            Ok(sub) => {
                self.set_state(topic, SubscriptionState::Subscribed).await;
                tracing::info!(topic = %topic, qos = %self.config.qos, "subscribed");
                Ok(sub)
            }
            Err(e) => {
                self.set_state(topic, SubscriptionState::Unsubscribed).await;
                Err(PipelineError::Subscription { topic: topic.to_string(), source: e })
            }
        }
    }

    fn spawn_forwarder(
        self: &Arc<Self>,
        topic: String,
        mut sub: Box<dyn MessageSubscription>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = sub.recv() => {
                        match msg {
                            // forward() logs and counts its own failures
                            Some(msg) => { let _ = bridge.forward(msg).await; }
                            None => {
                                tracing::warn!(topic = %topic, "subscription closed");
                                bridge.set_state(&topic, SubscriptionState::Unsubscribed).await;
                                break;
                            }
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
            tracing::debug!(topic = %topic, "forwarder stopped");
        })
    }

    /// Decode one inbound message and publish it on the log.
    pub async fn forward(&self, msg: InboundMessage) -> Result<LogAck, PipelineError> {
        let measurement = match codec::decode(&msg.topic, &msg.payload) {
            Ok(m) => m,
            Err(e) => {
                match e {
                    PipelineError::MalformedTopic { .. } => self.counters.inc_malformed_topic(),
                    _ => self.counters.inc_decode(),
                }
                tracing::warn!(
                    topic = %msg.topic,
                    payload = %String::from_utf8_lossy(&msg.payload),
                    error = %e,
                    "dropping message",
                );
                return Err(e);
            }
        };

        let bytes = codec::encode(&measurement).inspect_err(|e| {
            self.counters.inc_encode();
            tracing::error!(channel = %measurement.channel_id(), error = %e, "encode failed");
        })?;

        let log_topic = self.config.log_topic.as_str();
        let key = measurement.channel_id();
        let sent = self
            .publish_policy
            .run_with(
                || self.producer.send(log_topic, Some(key), bytes.clone()),
                |e| e.is_transient(),
                |_, _| self.counters.inc_publish_transient(),
            )
            .await;

        match sent {
            Ok(ack) => {
                self.counters.inc_bridged();
                tracing::debug!(
                    topic = %msg.topic, channel = %key,
                    partition = ack.partition, offset = ack.offset,
                    "bridged",
                );
                Ok(ack)
            }
            Err(ex) => {
                self.counters.inc_publish_failed();
                tracing::error!(
                    topic = %msg.topic, channel = %key,
                    attempts = ex.attempts, error = %ex.error,
                    "publish to log failed",
                );
                let topic = log_topic.to_string();
                if ex.error.is_transient() {
                    Err(PipelineError::PublishRetriesExhausted {
                        topic,
                        attempts: ex.attempts,
                        source: ex.error,
                    })
                } else {
                    Err(PipelineError::Publish { topic, source: ex.error })
                }
            }
        }
    }

    /// Current state of every known topic.
    pub async fn states(&self) -> BTreeMap<String, SubscriptionState> {
        self.states.lock().await.clone()
    }

    async fn set_state(&self, topic: &str, state: SubscriptionState) {
        self.states.lock().await.insert(topic.to_string(), state);
    }
}
