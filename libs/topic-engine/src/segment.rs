use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sensorgate_api::LogRecord;

use crate::EngineError;

/// `(group, topic, partition)`
pub(crate) type CommitKey = (String, String, u32);

/// Key length marker for records without a key.
const NO_KEY: u32 = u32::MAX;

// ═══════════════════════════════════════════════════════════════
//  Frames
// ═══════════════════════════════════════════════════════════════
//
//  [u32 body_len][u64 offset][u32 key_len | NO_KEY][key][payload]
//  all integers big-endian

pub(crate) struct Frame {
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

pub(crate) fn encode_frame(offset: u64, key: Option<&str>, payload: &[u8], buf: &mut Vec<u8>) {
    let key = key.map(str::as_bytes);
    let body = 8 + 4 + key.map_or(0, <[u8]>::len) + payload.len();
    buf.extend_from_slice(&(body as u32).to_be_bytes());
    buf.extend_from_slice(&offset.to_be_bytes());
    match key {
        Some(k) => {
            buf.extend_from_slice(&(k.len() as u32).to_be_bytes());
            buf.extend_from_slice(k);
        }
        None => buf.extend_from_slice(&NO_KEY.to_be_bytes()),
    }
    buf.extend_from_slice(payload);
}

fn decode_frame(buf: &[u8]) -> Option<(Frame, usize)> {
    let body_len = u32::from_be_bytes(buf.get(0..4)?.try_into().ok()?) as usize;
    let body = buf.get(4..4 + body_len)?;
    let offset = u64::from_be_bytes(body.get(0..8)?.try_into().ok()?);
    let key_len = u32::from_be_bytes(body.get(8..12)?.try_into().ok()?);
    let (key, payload) = if key_len == NO_KEY {
        (None, body.get(12..)?)
    } else {
        let end = 12 + key_len as usize;
        let key = std::str::from_utf8(body.get(12..end)?).ok()?;
        (Some(key.to_string()), body.get(end..)?)
    };
    Some((Frame { offset, key, payload: payload.to_vec() }, 4 + body_len))
}

/// Decode the complete frames at the start of `buf`. Returns them with the
/// number of bytes they cover; a torn tail is not included.
pub(crate) fn decode_frames(buf: &[u8]) -> (Vec<Frame>, usize) {
    let mut frames = Vec::new();
    let mut pos = 0;
    while let Some((frame, used)) = decode_frame(&buf[pos..]) {
        frames.push(frame);
        pos += used;
    }
    (frames, pos)
}

// ═══════════════════════════════════════════════════════════════
//  SegmentFile: one append-only file per partition
// ═══════════════════════════════════════════════════════════════

pub(crate) struct SegmentFile {
    path: PathBuf,
    file: File,
}

impl SegmentFile {
    /// Open or create the file and read back its frames. A torn tail left
    /// by a crash mid-write is cut off.
    pub fn open(path: PathBuf) -> Result<(Self, Vec<Frame>), EngineError> {
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let (frames, valid) = decode_frames(&buf);
        if valid < buf.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = buf.len() - valid,
                "truncating torn segment tail",
            );
            file.set_len(valid as u64)?;
        }
        Ok((Self { path, file }, frames))
    }

    pub fn append(&mut self, offset: u64, key: Option<&str>, payload: &[u8]) -> Result<(), EngineError> {
        let mut buf = Vec::with_capacity(16 + key.map_or(0, str::len) + payload.len());
        encode_frame(offset, key, payload, &mut buf);
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Replace the file content with `records`.
    pub fn rewrite<'a>(&mut self, records: impl Iterator<Item = &'a LogRecord>) -> Result<(), EngineError> {
        let mut buf = Vec::new();
        for r in records {
            encode_frame(r.offset, r.key.as_deref(), &r.payload, &mut buf);
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &buf)?;
        std::fs::rename(&tmp, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Committed offsets
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize, Deserialize)]
struct CommitEntry {
    group: String,
    topic: String,
    partition: u32,
    offset: u64,
}

pub(crate) fn load_commits(path: &Path) -> Result<HashMap<CommitKey, u64>, EngineError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let entries: Vec<CommitEntry> = serde_json::from_str(&content)
        .map_err(|e| EngineError::Storage(format!("{}: {e}", path.display())))?;
    Ok(entries
        .into_iter()
        .map(|c| ((c.group, c.topic, c.partition), c.offset))
        .collect())
}

pub(crate) fn store_commits(path: &Path, commits: &HashMap<CommitKey, u64>) -> Result<(), EngineError> {
    let mut entries: Vec<CommitEntry> = commits
        .iter()
        .map(|((group, topic, partition), offset)| CommitEntry {
            group: group.clone(),
            topic: topic.clone(),
            partition: *partition,
            offset: *offset,
        })
        .collect();
    entries.sort_by(|a, b| (&a.group, &a.topic, a.partition).cmp(&(&b.group, &b.topic, b.partition)));
    let json = serde_json::to_vec(&entries).map_err(|e| EngineError::Storage(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
