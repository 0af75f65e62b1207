mod backoff;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sensorgate_api::{
    ConnectionState, ConnectorError, InboundMessage, MessageSubscription, OverflowPolicy,
    PubSubBroker, Qos,
};
use sensorgate_topic_engine::SubscriberSet;

pub use backoff::Backoff;

// ═══════════════════════════════════════════════════════════════
//  MqttConfig
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Capacity of the client request queue.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// How long `connect` waits for the first CONNACK.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keep_alive_secs: default_keep_alive_secs(),
            clean_session: default_clean_session(),
            capacity: default_capacity(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    1883
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_clean_session() -> bool {
    true
}
fn default_capacity() -> usize {
    64
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_reconnect_initial_ms() -> u64 {
    500
}
fn default_reconnect_max_ms() -> u64 {
    60_000
}

pub fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn client_err(e: rumqttc::ClientError) -> ConnectorError {
    ConnectorError::io(format!("mqtt client: {e}"))
}

// ═══════════════════════════════════════════════════════════════
//  MqttBroker
// ═══════════════════════════════════════════════════════════════

struct Session {
    client: AsyncClient,
    token: CancellationToken,
    driver: JoinHandle<()>,
}

/// Shared between the broker handle and its event-loop driver.
struct Shared {
    state: StdMutex<ConnectionState>,
    routes: SubscriberSet,
    /// Active filters and their QoS, re-issued after a reconnect.
    filters: StdMutex<BTreeMap<String, Qos>>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().map(|s| *s).unwrap_or(ConnectionState::Disconnected)
    }

    fn filters(&self) -> Vec<(String, Qos)> {
        self.filters
            .lock()
            .map(|f| f.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }
}

/// MQTT v3.1.1 client on `rumqttc`.
///
/// The client id is a random UUID generated per instance. One background
/// driver polls the event loop, routes PUBLISH packets to subscriptions,
/// reconnects with exponential backoff and re-subscribes after every
/// reconnect.
pub struct MqttBroker {
    client_id: String,
    config: MqttConfig,
    session: Mutex<Option<Session>>,
    shared: Arc<Shared>,
}

impl MqttBroker {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            config,
            session: Mutex::new(None),
            shared: Arc::new(Shared {
                state: StdMutex::new(ConnectionState::Disconnected),
                routes: SubscriberSet::new(),
                filters: StdMutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.config.host, self.config.port);
        opts.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));
        opts.set_clean_session(self.config.clean_session);
        opts
    }

    /// Messages dropped by full `Drop` subscriptions.
    pub fn dropped(&self) -> u64 {
        self.shared.routes.dropped()
    }

    async fn client(&self) -> Result<AsyncClient, ConnectorError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or_else(|| ConnectorError::io("mqtt client is not connected"))
    }
}

impl PubSubBroker for MqttBroker {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        Box::pin(async move {
            let mut session = self.session.lock().await;
            if session.is_some() {
                return Ok(());
            }

            self.shared.set_state(ConnectionState::Connecting);
            let (client, eventloop) = AsyncClient::new(self.options(), self.config.capacity.max(1));
            let token = CancellationToken::new();
            let (first_tx, first_rx) = oneshot::channel();
            let driver = Driver {
                eventloop,
                client: client.clone(),
                shared: self.shared.clone(),
                token: token.clone(),
                backoff: Backoff::new(
                    Duration::from_millis(self.config.reconnect_initial_ms),
                    Duration::from_millis(self.config.reconnect_max_ms),
                ),
                first: Some(first_tx),
            };
            let driver = tokio::spawn(driver.run());

            let timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));
            let outcome = match tokio::time::timeout(timeout, first_rx).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(e),
                Ok(Err(_)) => Err(ConnectorError::io("mqtt driver stopped before connecting")),
                Err(_) => Err(ConnectorError::io(format!(
                    "no CONNACK from {}:{} within {timeout:?}",
                    self.config.host, self.config.port
                ))),
            };

            match outcome {
                Ok(()) => {
                    tracing::info!(
                        client_id = %self.client_id, host = %self.config.host,
                        port = self.config.port, "mqtt connected",
                    );
                    *session = Some(Session { client, token, driver });
                    Ok(())
                }
                Err(e) => {
                    token.cancel();
                    driver.abort();
                    self.shared.set_state(ConnectionState::Disconnected);
                    Err(e)
                }
            }
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        Box::pin(async move {
            let Some(session) = self.session.lock().await.take() else {
                return Ok(());
            };
            let result = session.client.disconnect().await.map_err(client_err);
            session.token.cancel();
            if tokio::time::timeout(Duration::from_secs(2), session.driver).await.is_err() {
                tracing::warn!(client_id = %self.client_id, "mqtt driver did not stop in time");
            }
            if let Ok(mut f) = self.shared.filters.lock() {
                f.clear();
            }
            self.shared.routes.clear().await;
            self.shared.set_state(ConnectionState::Disconnected);
            tracing::info!(client_id = %self.client_id, "mqtt disconnected");
            result
        })
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn subscribe(
        &self,
        filter: &str,
        qos: Qos,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn MessageSubscription>, ConnectorError>> + Send + '_>> {
        let filter = filter.to_string();
        Box::pin(async move {
            let client = self.client().await?;
            let sub = self.shared.routes.add(&filter, buffer, overflow).await;
            client.subscribe(&filter, to_mqtt_qos(qos)).await.map_err(client_err)?;
            if let Ok(mut f) = self.shared.filters.lock() {
                f.insert(filter.clone(), qos);
            }
            tracing::debug!(filter = %filter, qos = %qos, "mqtt subscribe sent");
            Ok(Box::new(sub) as Box<dyn MessageSubscription>)
        })
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let client = self.client().await?;
            client
                .publish(topic, to_mqtt_qos(qos), false, payload)
                .await
                .map_err(client_err)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Driver: event loop → routes
// ═══════════════════════════════════════════════════════════════

struct Driver {
    eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    token: CancellationToken,
    backoff: Backoff,
    /// Reports the outcome of the first connection attempt to `connect`.
    first: Option<oneshot::Sender<Result<(), ConnectorError>>>,
}

impl Driver {
    async fn run(mut self) {
        let mut connected_before = false;
        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => break,
                ev = self.eventloop.poll() => ev,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    self.backoff.reset();
                    self.shared.set_state(ConnectionState::Connected);
                    if let Some(tx) = self.first.take() {
                        let _ = tx.send(Ok(()));
                    }
                    if connected_before {
                        tracing::info!(session_present = ack.session_present, "mqtt reconnected");
                        self.resubscribe();
                    }
                    connected_before = true;
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let msg = InboundMessage::new(p.topic, p.payload.to_vec());
                    let delivered = self.shared.routes.dispatch(&msg).await;
                    if delivered == 0 {
                        tracing::debug!(topic = %msg.topic, "no subscriber for message");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if let Some(tx) = self.first.take() {
                        let _ = tx.send(Err(ConnectorError::io(format!("mqtt connect: {e}"))));
                        break;
                    }
                    self.shared.set_state(ConnectionState::Reconnecting);
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        error = %e, attempt = self.backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "mqtt connection lost, retrying",
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::debug!("mqtt driver stopped");
    }

    /// Re-issue every active subscription. Uses `try_subscribe`: this task
    /// is the one draining the request queue, so awaiting would deadlock.
    fn resubscribe(&self) {
        for (filter, qos) in self.shared.filters() {
            match self.client.try_subscribe(&filter, to_mqtt_qos(qos)) {
                Ok(()) => tracing::info!(filter = %filter, "resubscribed"),
                Err(e) => tracing::error!(filter = %filter, error = %e, "resubscribe failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique_uuids() {
        let a = MqttBroker::new(MqttConfig::default());
        let b = MqttBroker::new(MqttConfig::default());
        assert_ne!(a.client_id(), b.client_id());
        assert!(uuid::Uuid::parse_str(a.client_id()).is_ok());
    }

    #[test]
    fn options_follow_config() {
        let cfg: MqttConfig =
            serde_json::from_str(r#"{"host":"broker.local","port":8883,"keep_alive_secs":60}"#)
                .unwrap();
        let broker = MqttBroker::new(cfg);
        let opts = broker.options();
        assert_eq!(opts.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(opts.keep_alive(), Duration::from_secs(60));
        assert!(opts.clean_session());
        assert_eq!(opts.client_id(), broker.client_id());
    }

    #[test]
    fn qos_mapping() {
        assert_eq!(to_mqtt_qos(Qos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_mqtt_qos(Qos::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn requires_connection() {
        let broker = MqttBroker::new(MqttConfig::default());
        assert_eq!(broker.connection_state(), ConnectionState::Disconnected);
        let err = broker.publish("a/b/c", b"1".to_vec(), Qos::AtMostOnce).await.unwrap_err();
        assert!(err.is_transient());
        broker.disconnect().await.unwrap();
    }
}
