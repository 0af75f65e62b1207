use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use sensorgate_api::{
    ConnectionState, ConnectorError, InboundMessage, MessageSubscription, OverflowPolicy,
    PubSubBroker, Qos,
};

use crate::EngineError;
use crate::subscribers::SubscriberSet;

/// In-process pub/sub broker.
///
/// Behaves like a single-node MQTT broker with an always-reachable link.
/// Stands in for the network broker when wiring the pipeline in tests.
pub struct LocalBroker {
    client_id: String,
    state: Mutex<ConnectionState>,
    subscribers: SubscriberSet,
    connects: AtomicU64,
    disconnects: AtomicU64,
}

impl LocalBroker {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            state: Mutex::new(ConnectionState::Disconnected),
            subscribers: SubscriberSet::new(),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
        }
    }

    /// Number of times a session was actually opened.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn disconnect_count(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.subscribers.dropped()
    }

    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    fn ensure_connected(&self) -> Result<(), ConnectorError> {
        if self.connection_state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(EngineError::NotConnected.into_connector_error())
        }
    }
}

impl PubSubBroker for LocalBroker {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        Box::pin(async move {
            if self.connection_state() != ConnectionState::Connected {
                self.connects.fetch_add(1, Ordering::Relaxed);
                self.set_state(ConnectionState::Connected);
                tracing::debug!(client_id = %self.client_id, "local broker connected");
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        Box::pin(async move {
            if self.connection_state() == ConnectionState::Connected {
                self.disconnects.fetch_add(1, Ordering::Relaxed);
                self.set_state(ConnectionState::Disconnected);
                self.subscribers.clear().await;
                tracing::debug!(client_id = %self.client_id, "local broker disconnected");
            }
            Ok(())
        })
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn subscribe(
        &self,
        filter: &str,
        _qos: Qos,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn MessageSubscription>, ConnectorError>> + Send + '_>> {
        let filter = filter.to_string();
        Box::pin(async move {
            self.ensure_connected()?;
            if filter.is_empty() {
                return Err(EngineError::InvalidFilter(filter).into_connector_error());
            }
            let sub = self.subscribers.add(&filter, buffer, overflow).await;
            Ok(Box::new(sub) as Box<dyn MessageSubscription>)
        })
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: Qos,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        let msg = InboundMessage::new(topic, payload);
        Box::pin(async move {
            self.ensure_connected()?;
            let delivered = self.subscribers.dispatch(&msg).await;
            tracing::trace!(topic = %msg.topic, delivered, "local publish");
            Ok(())
        })
    }
}
