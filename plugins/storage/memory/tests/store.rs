use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use sensorgate_api::{Measurement, TimeSeriesStore};
use sensorgate_storage_memory::MemoryStore;

fn m(channel: &str, secs: i64, value: i64) -> Measurement {
    let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs);
    Measurement::new(channel, ts, Decimal::from(value)).unwrap()
}

#[tokio::test]
async fn upsert_overwrites_same_key() {
    let store = MemoryStore::new(100);
    store.init().await.unwrap();

    store.insert_batch(&[m("KITCHEN-TEMP", 0, 21), m("KITCHEN-HUM", 0, 40)]).await.unwrap();
    store.insert_batch(&[m("KITCHEN-TEMP", 0, 22)]).await.unwrap();

    assert_eq!(store.len().await, 2);
    assert_eq!(store.latest("KITCHEN-TEMP").await.unwrap().value(), Decimal::from(22));
}

#[tokio::test]
async fn evicts_oldest_beyond_capacity() {
    let store = MemoryStore::new(2);
    let rows = [m("A", 0, 1), m("A", 1, 2), m("A", 2, 3)];
    assert_eq!(store.insert_batch(&rows).await.unwrap(), 3);

    let kept = store.query(Some("A"), None, None).await;
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].value(), Decimal::from(2));
    assert_eq!(store.latest("A").await.unwrap().value(), Decimal::from(3));
}

#[tokio::test]
async fn query_filters_by_channel_and_range() {
    let store = MemoryStore::new(100);
    let rows = [m("A", 0, 1), m("B", 1, 2), m("A", 2, 3), m("A", 3, 4)];
    store.insert_batch(&rows).await.unwrap();

    let from = rows[1].timestamp();
    let to = rows[3].timestamp();
    let got = store.query(Some("A"), Some(from), Some(to)).await;
    assert_eq!(got, vec![rows[2].clone()]);
    assert!(store.latest("C").await.is_none());
}
