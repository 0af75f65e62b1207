use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Failure and throughput counters shared by the bridge and the writer.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    malformed_topic: AtomicU64,
    decode: AtomicU64,
    encode: AtomicU64,
    subscription: AtomicU64,
    publish_transient: AtomicU64,
    publish_failed: AtomicU64,
    store_transient: AtomicU64,
    store_failed: AtomicU64,
    bridged: AtomicU64,
    persisted: AtomicU64,
}

/// Point-in-time copy of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub malformed_topic: u64,
    pub decode: u64,
    pub encode: u64,
    pub subscription: u64,
    pub publish_transient: u64,
    pub publish_failed: u64,
    pub store_transient: u64,
    pub store_failed: u64,
    pub bridged: u64,
    pub persisted: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(inc_malformed_topic, malformed_topic);
    counter!(inc_decode, decode);
    counter!(inc_encode, encode);
    counter!(inc_subscription, subscription);
    counter!(inc_publish_transient, publish_transient);
    counter!(inc_publish_failed, publish_failed);
    counter!(inc_store_transient, store_transient);
    counter!(inc_bridged, bridged);

    pub fn add_store_failed(&self, n: u64) {
        self.store_failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_persisted(&self, n: u64) {
        self.persisted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            malformed_topic: load(&self.malformed_topic),
            decode: load(&self.decode),
            encode: load(&self.encode),
            subscription: load(&self.subscription),
            publish_transient: load(&self.publish_transient),
            publish_failed: load(&self.publish_failed),
            store_transient: load(&self.store_transient),
            store_failed: load(&self.store_failed),
            bridged: load(&self.bridged),
            persisted: load(&self.persisted),
        }
    }
}

impl CountersSnapshot {
    /// Sum of all failure counters (transient retries excluded).
    pub fn failures(&self) -> u64 {
        self.malformed_topic
            + self.decode
            + self.encode
            + self.subscription
            + self.publish_failed
            + self.store_failed
    }
}
