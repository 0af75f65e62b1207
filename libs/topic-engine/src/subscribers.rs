use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};

use sensorgate_api::util::topic_matches;
use sensorgate_api::{InboundMessage, MessageSubscription, OverflowPolicy};

// ═══════════════════════════════════════════════════════════════
//  ChannelSubscription: mpsc-backed MessageSubscription
// ═══════════════════════════════════════════════════════════════

pub struct ChannelSubscription {
    rx: mpsc::Receiver<InboundMessage>,
}

impl MessageSubscription for ChannelSubscription {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<InboundMessage>> + Send + '_>> {
        Box::pin(async move { self.rx.recv().await })
    }
}

// ═══════════════════════════════════════════════════════════════
//  SubscriberSet
// ═══════════════════════════════════════════════════════════════

struct Subscriber {
    filter: String,
    tx: mpsc::Sender<InboundMessage>,
    overflow: OverflowPolicy,
}

/// Filter-matched fan-out to bounded subscriber channels.
///
/// Shared by the in-process broker and the MQTT client: both register one
/// entry per `subscribe` call and route each incoming message here.
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: RwLock<Vec<Subscriber>>,
    dropped: AtomicU64,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(
        &self,
        filter: &str,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> ChannelSubscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut subs = self.subscribers.write().await;
        subs.push(Subscriber { filter: filter.to_string(), tx, overflow });
        ChannelSubscription { rx }
    }

    /// Distinct filters with at least one live subscriber.
    pub async fn filters(&self) -> Vec<String> {
        let subs = self.subscribers.read().await;
        let mut out: Vec<String> = Vec::new();
        for sub in subs.iter().filter(|s| !s.tx.is_closed()) {
            if !out.contains(&sub.filter) {
                out.push(sub.filter.clone());
            }
        }
        out
    }

    /// Messages dropped because a `Drop` subscriber was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver to every matching subscriber. Returns the number of
    /// subscribers that accepted the message.
    pub async fn dispatch(&self, msg: &InboundMessage) -> usize {
        let targets: Vec<(mpsc::Sender<InboundMessage>, OverflowPolicy)> = {
            let subs = self.subscribers.read().await;
            subs.iter()
                .filter(|s| topic_matches(&s.filter, &msg.topic))
                .map(|s| (s.tx.clone(), s.overflow))
                .collect()
        };

        let mut delivered = 0;
        let mut saw_closed = false;
        for (tx, overflow) in targets {
            match overflow {
                OverflowPolicy::Drop => match tx.try_send(msg.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(topic = %msg.topic, "subscriber channel full, dropping");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => saw_closed = true,
                },
                OverflowPolicy::BackPressure => {
                    if tx.send(msg.clone()).await.is_ok() {
                        delivered += 1;
                    } else {
                        saw_closed = true;
                    }
                }
            }
        }

        if saw_closed {
            self.prune().await;
        }
        delivered
    }

    async fn prune(&self) {
        let mut subs = self.subscribers.write().await;
        subs.retain(|s| !s.tx.is_closed());
    }

    /// Close every subscription channel.
    pub async fn clear(&self) {
        self.subscribers.write().await.clear();
    }
}
