use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use sensorgate_api::{
    ConnectionState, ConnectorError, InboundMessage, LogAck, LogProducer, MessageSubscription,
    OverflowPolicy, PubSubBroker, Qos,
};
use sensorgate_pipeline::config::BridgeConfig;
use sensorgate_pipeline::{
    codec, ConnectionManager, IngestBridge, PipelineCounters, PipelineError, SubscriptionState,
};
use sensorgate_topic_engine::{LocalBroker, PartitionedLog};

/// Local broker that refuses subscriptions to one filter.
struct RefusingBroker {
    inner: LocalBroker,
    refuse: String,
}

impl PubSubBroker for RefusingBroker {
    fn client_id(&self) -> &str {
        self.inner.client_id()
    }

    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        self.inner.connect()
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        self.inner.disconnect()
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    fn subscribe(
        &self,
        filter: &str,
        qos: Qos,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn MessageSubscription>, ConnectorError>> + Send + '_>> {
        if filter == self.refuse {
            return Box::pin(async { Err(ConnectorError::new("not authorized")) });
        }
        self.inner.subscribe(filter, qos, buffer, overflow)
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConnectorError>> + Send + '_>> {
        self.inner.publish(topic, payload, qos)
    }
}

/// Producer that always fails with the given error.
struct FailingProducer {
    transient: bool,
    calls: AtomicU32,
}

impl LogProducer for FailingProducer {
    fn send(
        &self,
        _topic: &str,
        _key: Option<&str>,
        _payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<LogAck, ConnectorError>> + Send + '_>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.transient {
                Err(ConnectorError::io("log unavailable"))
            } else {
                Err(ConnectorError::new("record too large"))
            }
        })
    }
}

fn topics(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

async fn all_records(log: &PartitionedLog, topic: &str) -> Vec<sensorgate_api::LogRecord> {
    let mut out = Vec::new();
    for p in 0..log.partitions() {
        out.extend(log.read(topic, p, 0).await);
    }
    out
}

async fn wait_for_records(log: &PartitionedLog, topic: &str, n: usize) -> Vec<sensorgate_api::LogRecord> {
    for _ in 0..200 {
        let records = all_records(log, topic).await;
        if records.len() >= n {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("log never reached {n} records");
}

#[tokio::test]
async fn refused_topic_does_not_block_the_others() {
    let broker = Arc::new(RefusingBroker {
        inner: LocalBroker::new("bridge-test"),
        refuse: "home/attic/temp".into(),
    });
    let connection = Arc::new(ConnectionManager::new(broker.clone()));
    let log = Arc::new(PartitionedLog::new(3, 1000).unwrap());
    let counters = Arc::new(PipelineCounters::new());
    let bridge = Arc::new(IngestBridge::new(
        connection,
        log.clone(),
        counters.clone(),
        BridgeConfig::default(),
    ));
    let token = CancellationToken::new();

    let handles = bridge
        .start(&topics(&["home/attic/temp", "home/kitchen/temp"]), token.clone())
        .await
        .unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(counters.snapshot().subscription, 1);

    let states = bridge.states().await;
    assert_eq!(states["home/attic/temp"], SubscriptionState::Unsubscribed);
    assert_eq!(states["home/kitchen/temp"], SubscriptionState::Subscribed);

    broker.publish("home/kitchen/temp", b"2150".to_vec(), Qos::AtLeastOnce).await.unwrap();

    let records = wait_for_records(&log, "measurements", 1).await;
    assert_eq!(records[0].key.as_deref(), Some("KITCHEN-TEMP"));
    let m = codec::decode_record(&records[0].payload).unwrap();
    assert_eq!(m.channel_id(), "KITCHEN-TEMP");
    assert_eq!(m.value(), Decimal::from_str("21.5").unwrap());
    assert_eq!(counters.snapshot().bridged, 1);

    token.cancel();
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn undecodable_messages_are_counted_and_dropped() {
    let connection = Arc::new(ConnectionManager::new(Arc::new(LocalBroker::new("decode-test"))));
    let log = Arc::new(PartitionedLog::new(1, 100).unwrap());
    let counters = Arc::new(PipelineCounters::new());
    let bridge = IngestBridge::new(connection, log.clone(), counters.clone(), BridgeConfig::default());

    let err = bridge.forward(InboundMessage::new("home/kitchen/temp", "warm")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Decode(_)));

    let err = bridge.forward(InboundMessage::new("home/temp", "2150")).await.unwrap_err();
    assert!(matches!(err, PipelineError::MalformedTopic { .. }));

    let s = counters.snapshot();
    assert_eq!(s.decode, 1);
    assert_eq!(s.malformed_topic, 1);
    assert_eq!(s.bridged, 0);
    assert!(all_records(&log, "measurements").await.is_empty());
}

#[tokio::test]
async fn same_channel_lands_on_one_partition() {
    let connection = Arc::new(ConnectionManager::new(Arc::new(LocalBroker::new("key-test"))));
    let log = Arc::new(PartitionedLog::new(4, 100).unwrap());
    let bridge = IngestBridge::new(
        connection,
        log.clone(),
        Arc::new(PipelineCounters::new()),
        BridgeConfig::default(),
    );

    let mut partitions = BTreeSet::new();
    for raw in ["1000", "1100", "1200"] {
        let ack = bridge.forward(InboundMessage::new("home/bedroom/hum", raw)).await.unwrap();
        partitions.insert(ack.partition);
    }
    assert_eq!(partitions.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_publish_failures_are_retried_then_reported() {
    let connection = Arc::new(ConnectionManager::new(Arc::new(LocalBroker::new("retry-test"))));
    let producer = Arc::new(FailingProducer { transient: true, calls: AtomicU32::new(0) });
    let counters = Arc::new(PipelineCounters::new());
    let bridge = IngestBridge::new(connection, producer.clone(), counters.clone(), BridgeConfig::default());

    let err = bridge.forward(InboundMessage::new("home/kitchen/press", "1013250")).await.unwrap_err();
    assert!(matches!(err, PipelineError::PublishRetriesExhausted { attempts: 3, .. }));
    assert_eq!(producer.calls.load(Ordering::SeqCst), 3);

    let s = counters.snapshot();
    assert_eq!(s.publish_transient, 2);
    assert_eq!(s.publish_failed, 1);
}

#[tokio::test]
async fn permanent_publish_failure_is_not_retried() {
    let connection = Arc::new(ConnectionManager::new(Arc::new(LocalBroker::new("perm-test"))));
    let producer = Arc::new(FailingProducer { transient: false, calls: AtomicU32::new(0) });
    let bridge = IngestBridge::new(
        connection,
        producer.clone(),
        Arc::new(PipelineCounters::new()),
        BridgeConfig::default(),
    );

    let err = bridge.forward(InboundMessage::new("home/kitchen/temp", "2000")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Publish { .. }));
    assert_eq!(producer.calls.load(Ordering::SeqCst), 1);
}
