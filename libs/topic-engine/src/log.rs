use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sensorgate_api::{ConnectorError, LogAck, LogProducer, LogRecord, RecordHandler};

use crate::EngineError;
use crate::segment::{self, CommitKey, SegmentFile};

const COMMITS_FILE: &str = "commits.json";

// ═══════════════════════════════════════════════════════════════
//  Partition
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Partition {
    /// Offset of `records[0]`.
    base: u64,
    records: VecDeque<LogRecord>,
    /// Backing file in durable mode.
    segment: Option<SegmentFile>,
    /// Records evicted since the segment was last rewritten.
    evicted: usize,
}

impl Partition {
    fn end_offset(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn read(&self, from: u64, max: usize) -> Vec<LogRecord> {
        let start = from.saturating_sub(self.base) as usize;
        self.records.iter().skip(start).take(max).cloned().collect()
    }

    fn push(&mut self, record: LogRecord, retention: usize) -> Result<(), EngineError> {
        if let Some(seg) = self.segment.as_mut() {
            seg.append(record.offset, record.key.as_deref(), &record.payload)?;
        }
        self.records.push_back(record);
        while self.records.len() > retention {
            self.records.pop_front();
            self.base += 1;
            self.evicted += 1;
        }
        if self.evicted >= retention {
            if let Some(seg) = self.segment.as_mut() {
                if let Err(e) = seg.rewrite(self.records.iter()) {
                    tracing::error!(error = %e, "segment compaction failed");
                    return Ok(());
                }
            }
            self.evicted = 0;
        }
        Ok(())
    }
}

struct LogTopic {
    name: String,
    partitions: Vec<Mutex<Partition>>,
    appended: Notify,
    round_robin: AtomicU32,
}

impl LogTopic {
    fn new(name: &str, partitions: Vec<Partition>) -> Self {
        Self {
            name: name.to_string(),
            partitions: partitions.into_iter().map(Mutex::new).collect(),
            appended: Notify::new(),
            round_robin: AtomicU32::new(0),
        }
    }

    fn in_memory(name: &str, partitions: u32) -> Self {
        Self::new(name, (0..partitions).map(|_| Partition::default()).collect())
    }

    /// Load or create `dir/<name>/<p>.seg` for every partition.
    fn open(dir: &Path, name: &str, partitions: u32, retention: usize) -> Result<Self, EngineError> {
        let topic_dir = dir.join(name);
        std::fs::create_dir_all(&topic_dir)?;
        let mut loaded = Vec::with_capacity(partitions as usize);
        for p in 0..partitions {
            let (mut seg, frames) = SegmentFile::open(topic_dir.join(format!("{p}.seg")))?;
            let skip = frames.len().saturating_sub(retention);
            let records: VecDeque<LogRecord> = frames
                .into_iter()
                .skip(skip)
                .map(|f| LogRecord {
                    topic: name.to_string(),
                    partition: p,
                    offset: f.offset,
                    key: f.key,
                    payload: f.payload,
                })
                .collect();
            if skip > 0 {
                seg.rewrite(records.iter())?;
            }
            let base = records.front().map_or(0, |r| r.offset);
            loaded.push(Partition { base, records, segment: Some(seg), evicted: 0 });
        }
        Ok(Self::new(name, loaded))
    }

    fn partition_for(&self, key: Option<&str>) -> u32 {
        let n = self.partitions.len() as u32;
        match key {
            Some(k) => fnv1a(k.as_bytes()) % n,
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % n,
        }
    }
}

/// 32-bit FNV-1a, stable across processes and releases.
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Topic names double as directory names in durable mode.
fn valid_topic_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// ═══════════════════════════════════════════════════════════════
//  Committed offsets
// ═══════════════════════════════════════════════════════════════

struct Commits {
    offsets: Mutex<HashMap<CommitKey, u64>>,
    path: Option<PathBuf>,
}

impl Commits {
    async fn get(&self, key: &CommitKey) -> u64 {
        self.offsets.lock().await.get(key).copied().unwrap_or(0)
    }

    async fn commit(&self, key: CommitKey, offset: u64) {
        let mut offsets = self.offsets.lock().await;
        offsets.insert(key, offset);
        if let Some(path) = &self.path {
            // Failure means redelivery after a restart, not loss.
            if let Err(e) = segment::store_commits(path, &offsets) {
                tracing::error!(error = %e, "failed to persist committed offsets");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  PartitionedLog
// ═══════════════════════════════════════════════════════════════

/// Embedded append-only log with Kafka-like semantics: topics split into
/// partitions, per-key partition affinity, consumer groups with committed
/// offsets.
///
/// Each partition keeps at most `retention` records; older ones are evicted
/// but offsets never restart. [`PartitionedLog::new`] keeps everything in
/// memory. [`PartitionedLog::open`] also writes every record to a segment
/// file before acknowledging it and persists committed offsets, so a
/// restarted process resumes each group where it left off. Segment writes
/// are not fsynced: they survive a process crash, not a host crash.
pub struct PartitionedLog {
    partitions: u32,
    retention: usize,
    dir: Option<PathBuf>,
    topics: RwLock<HashMap<String, Arc<LogTopic>>>,
    commits: Arc<Commits>,
}

impl PartitionedLog {
    pub fn new(partitions: u32, retention: usize) -> Result<Self, EngineError> {
        if partitions == 0 {
            return Err(EngineError::Config("partitions must be at least 1".into()));
        }
        if retention == 0 {
            return Err(EngineError::Config("retention must be at least 1".into()));
        }
        Ok(Self {
            partitions,
            retention,
            dir: None,
            topics: RwLock::new(HashMap::new()),
            commits: Arc::new(Commits { offsets: Mutex::new(HashMap::new()), path: None }),
        })
    }

    /// Open a durable log under `dir`, restoring topics and committed
    /// offsets written by a previous run.
    pub fn open(dir: impl AsRef<Path>, partitions: u32, retention: usize) -> Result<Self, EngineError> {
        let mut log = Self::new(partitions, retention)?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let commits_path = dir.join(COMMITS_FILE);
        let offsets = segment::load_commits(&commits_path)?;

        let mut topics = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !valid_topic_name(&name) {
                continue;
            }
            let topic = LogTopic::open(&dir, &name, partitions, retention)?;
            tracing::info!(topic = %name, partitions, "log topic restored");
            topics.insert(name, Arc::new(topic));
        }

        tracing::info!(dir = %dir.display(), topics = topics.len(), commits = offsets.len(), "durable log opened");
        log.topics = RwLock::new(topics);
        log.commits = Arc::new(Commits { offsets: Mutex::new(offsets), path: Some(commits_path) });
        log.dir = Some(dir);
        Ok(log)
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn topic(&self, name: &str) -> Result<Arc<LogTopic>, EngineError> {
        if !valid_topic_name(name) {
            return Err(EngineError::InvalidTopic(name.to_string()));
        }
        if let Some(t) = self.topics.read().await.get(name) {
            return Ok(t.clone());
        }
        let mut topics = self.topics.write().await;
        if let Some(t) = topics.get(name) {
            return Ok(t.clone());
        }
        let t = match &self.dir {
            Some(dir) => LogTopic::open(dir, name, self.partitions, self.retention)?,
            None => LogTopic::in_memory(name, self.partitions),
        };
        tracing::info!(topic = %name, partitions = self.partitions, "log topic created");
        let t = Arc::new(t);
        topics.insert(name.to_string(), t.clone());
        Ok(t)
    }

    /// Append a record; creates the topic on first use.
    pub async fn append(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<LogAck, EngineError> {
        let t = self.topic(topic).await?;
        let partition = t.partition_for(key);
        let offset = {
            let mut p = t.partitions[partition as usize].lock().await;
            let offset = p.end_offset();
            let record = LogRecord {
                topic: t.name.clone(),
                partition,
                offset,
                key: key.map(str::to_string),
                payload,
            };
            p.push(record, self.retention)?;
            offset
        };
        t.appended.notify_waiters();
        tracing::trace!(topic = %topic, partition, offset, "appended");
        Ok(LogAck { partition, offset })
    }

    /// Next offset to be written to a partition. `None` for an unknown
    /// topic or partition.
    pub async fn end_offset(&self, topic: &str, partition: u32) -> Option<u64> {
        let t = self.topics.read().await.get(topic).cloned()?;
        let p = t.partitions.get(partition as usize)?;
        Some(p.lock().await.end_offset())
    }

    /// Records currently retained in a partition starting at `from`.
    pub async fn read(&self, topic: &str, partition: u32, from: u64) -> Vec<LogRecord> {
        let Some(t) = self.topics.read().await.get(topic).cloned() else {
            return Vec::new();
        };
        match t.partitions.get(partition as usize) {
            Some(p) => p.lock().await.read(from, usize::MAX),
            None => Vec::new(),
        }
    }

    /// Offset the group will resume from (0 if nothing committed).
    pub async fn committed(&self, group: &str, topic: &str, partition: u32) -> u64 {
        self.commits.get(&(group.to_string(), topic.to_string(), partition)).await
    }

    /// Retained records the group has not committed yet, over all partitions.
    pub async fn lag(&self, group: &str, topic: &str) -> u64 {
        let Some(t) = self.topics.read().await.get(topic).cloned() else {
            return 0;
        };
        let mut lag = 0;
        for (i, p) in t.partitions.iter().enumerate() {
            let (base, end) = {
                let p = p.lock().await;
                (p.base, p.end_offset())
            };
            let committed = self.committed(group, topic, i as u32).await.max(base);
            lag += end.saturating_sub(committed);
        }
        lag
    }

    /// Start the consumer group workers for a topic.
    ///
    /// Spawns `min(concurrency, partitions)` workers; partition `p` is owned
    /// by worker `p % workers`, so records of one partition are handled in
    /// offset order. Each pass hands up to `max_batch` records of a partition
    /// to [`RecordHandler::handle_batch`] and commits past the last of them
    /// once it returns, whether or not some records failed (at-least-once
    /// on crash).
    pub async fn spawn_consumers(
        &self,
        topic: &str,
        group: &str,
        concurrency: usize,
        max_batch: usize,
        handler: Arc<dyn RecordHandler>,
        token: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, EngineError> {
        if concurrency == 0 {
            return Err(EngineError::Config("consumer concurrency must be at least 1".into()));
        }
        if max_batch == 0 {
            return Err(EngineError::Config("consumer batch size must be at least 1".into()));
        }
        let t = self.topic(topic).await?;
        let workers = concurrency.min(self.partitions as usize);

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let owned: Vec<u32> = (0..self.partitions)
                .filter(|p| *p as usize % workers == worker)
                .collect();
            tracing::info!(topic = %topic, group = %group, worker, partitions = ?owned, "consumer started");
            let consumer = Consumer {
                topic: t.clone(),
                group: group.to_string(),
                owned,
                max_batch,
                commits: self.commits.clone(),
                handler: handler.clone(),
                token: token.clone(),
            };
            handles.push(tokio::spawn(consumer.run()));
        }
        Ok(handles)
    }
}

impl LogProducer for PartitionedLog {
    fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<LogAck, ConnectorError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.map(str::to_string);
        Box::pin(async move {
            self.append(&topic, key.as_deref(), payload)
                .await
                .map_err(EngineError::into_connector_error)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Consumer worker
// ═══════════════════════════════════════════════════════════════

struct Consumer {
    topic: Arc<LogTopic>,
    group: String,
    owned: Vec<u32>,
    max_batch: usize,
    commits: Arc<Commits>,
    handler: Arc<dyn RecordHandler>,
    token: CancellationToken,
}

impl Consumer {
    async fn run(self) {
        loop {
            // Register for wakeups before polling so an append between the
            // poll and the wait is not missed.
            let appended = self.topic.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let mut progressed = false;
            for &partition in &self.owned {
                if self.token.is_cancelled() {
                    return;
                }
                progressed |= self.poll_partition(partition).await;
            }

            if !progressed {
                tokio::select! {
                    _ = self.token.cancelled() => return,
                    _ = &mut appended => {}
                }
            }
        }
    }

    async fn poll_partition(&self, partition: u32) -> bool {
        let key = (self.group.clone(), self.topic.name.clone(), partition);
        let from = self.commits.get(&key).await;

        let batch = {
            let p = self.topic.partitions[partition as usize].lock().await;
            if from < p.base {
                tracing::warn!(
                    topic = %self.topic.name, partition,
                    committed = from, earliest = p.base,
                    "records evicted before consumption, skipping ahead",
                );
            }
            p.read(from, self.max_batch)
        };
        let Some(last) = batch.last().map(|r| r.offset) else {
            return false;
        };

        for (i, e) in self.handler.handle_batch(&batch).await {
            if let Some(record) = batch.get(i) {
                tracing::error!(
                    topic = %record.topic, partition = record.partition,
                    offset = record.offset, error = %e,
                    "record handler failed",
                );
            }
        }
        self.commits.commit(key, last + 1).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(PartitionedLog::new(0, 10).is_err());
        assert!(PartitionedLog::new(3, 0).is_err());
    }

    #[test]
    fn topic_names_must_be_path_safe() {
        assert!(valid_topic_name("measurements"));
        assert!(valid_topic_name("sensor.data-v2_x"));
        assert!(!valid_topic_name(""));
        assert!(!valid_topic_name(".."));
        assert!(!valid_topic_name("a/b"));
    }

    #[tokio::test]
    async fn same_key_same_partition_and_monotonic_offsets() {
        let log = PartitionedLog::new(4, 1000).unwrap();
        let mut partition = None;
        for i in 0..10u64 {
            let ack = log.send("m", Some("KITCHEN-TEMP"), vec![i as u8]).await.unwrap();
            assert_eq!(*partition.get_or_insert(ack.partition), ack.partition);
            assert_eq!(ack.offset, i);
        }
        assert_eq!(log.end_offset("m", partition.unwrap()).await, Some(10));
    }

    #[tokio::test]
    async fn keyless_records_round_robin() {
        let log = PartitionedLog::new(3, 1000).unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(log.send("m", None, Vec::new()).await.unwrap().partition);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn retention_evicts_but_keeps_offsets() {
        let log = PartitionedLog::new(1, 2).unwrap();
        for i in 0..5u8 {
            log.append("m", None, vec![i]).await.unwrap();
        }
        let kept = log.read("m", 0, 0).await;
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].offset, 3);
        assert_eq!(kept[1].payload, vec![4]);
        assert_eq!(log.end_offset("m", 0).await, Some(5));
        // Evicted records no longer count as lag.
        assert_eq!(log.lag("g", "m").await, 2);
    }

    #[tokio::test]
    async fn unknown_topic_has_no_offsets() {
        let log = PartitionedLog::new(1, 2).unwrap();
        assert_eq!(log.end_offset("nope", 0).await, None);
        assert_eq!(log.committed("g", "nope", 0).await, 0);
        assert_eq!(log.lag("g", "nope").await, 0);
        assert!(log.append("", None, Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn durable_segments_are_compacted_to_retention() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = PartitionedLog::open(dir.path(), 1, 3).unwrap();
            for i in 0..10u8 {
                log.append("m", None, vec![i]).await.unwrap();
            }
        }
        let log = PartitionedLog::open(dir.path(), 1, 3).unwrap();
        let kept = log.read("m", 0, 0).await;
        assert_eq!(kept.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(log.end_offset("m", 0).await, Some(10));

        let (_, frames) = SegmentFile::open(dir.path().join("m").join("0.seg")).unwrap();
        assert!(frames.len() <= 6);
    }
}
