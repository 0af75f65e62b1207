use std::future::Future;
use std::pin::Pin;

use crate::{ConnectionState, ConnectorError, OverflowPolicy, Qos};

/// A message delivered by the pub/sub broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

/// Live stream of messages for one subscription filter.
///
/// Implemented by each broker; the api crate only defines the trait and
/// stays free of tokio.
pub trait MessageSubscription: Send {
    /// Next message. `None` = subscription closed or broker shut down.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<InboundMessage>> + Send + '_>>;
}

/// Client of a topic-based pub/sub broker (MQTT or in-process).
pub trait PubSubBroker: Send + Sync {
    /// Unique client identity presented to the broker.
    fn client_id(&self) -> &str;

    /// Open the session. Calling it on a connected client is a no-op.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>>;

    /// Close the session. Calling it on a disconnected client is a no-op.
    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>>;

    fn connection_state(&self) -> ConnectionState;

    /// Subscribe to a filter (`+` and `#` wildcards allowed).
    ///
    /// - `buffer`: channel capacity of the returned subscription
    /// - `overflow`: what to do when that channel is full
    #[allow(clippy::type_complexity)]
    fn subscribe(
        &self,
        filter: &str,
        qos: Qos,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn MessageSubscription>, ConnectorError>> + Send + '_>>;

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>>;
}
