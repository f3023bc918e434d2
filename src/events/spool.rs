//! File-backed broker
//!
//! Each topic is a directory of append-only JSON-lines partition files plus
//! one offsets file per consumer group:
//!
//! ```text
//! <spool>/<topic>/partition-0.jsonl
//! <spool>/<topic>/offsets-<group>.json
//! ```
//!
//! This lets the consumer run as its own process against events appended
//! by another. A record is one newline-terminated line; the offset of a
//! record is its line number, blank lines included. A trailing line with no
//! newline is still being written and is not a record yet.

use super::broker::{partition_for, Broker, Delivery, Subscription};
use crate::config::BrokerConfig;
use crate::error::{AclError, AclResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpoolRecord {
    key: String,
    payload: String,
    published_at: DateTime<Utc>,
}

/// Per-topic view used by `aclsync status`
#[derive(Debug, Clone, Serialize)]
pub struct TopicStatus {
    pub topic: String,
    /// Record count per partition
    pub partitions: Vec<u64>,
    /// Committed offsets per group
    pub groups: BTreeMap<String, Vec<u64>>,
}

impl TopicStatus {
    pub fn total(&self) -> u64 {
        self.partitions.iter().sum()
    }

    pub fn lag(&self, group: &str) -> u64 {
        let committed = self.groups.get(group);
        self.partitions
            .iter()
            .enumerate()
            .map(|(p, len)| {
                let done = committed.and_then(|c| c.get(p)).copied().unwrap_or(0);
                len.saturating_sub(done)
            })
            .sum()
    }
}

/// Broker over a spool directory
#[derive(Debug, Clone)]
pub struct SpoolBroker {
    root: PathBuf,
    partitions: u32,
    poll_interval: Duration,
}

impl SpoolBroker {
    pub fn new(root: PathBuf, partitions: u32, poll_interval: Duration) -> Self {
        Self {
            root,
            partitions: partitions.max(1),
            poll_interval,
        }
    }

    pub fn from_config(root: PathBuf, config: &BrokerConfig) -> Self {
        Self::new(root, config.partitions, config.poll_interval())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn topic_dir(&self, topic: &str) -> PathBuf {
        self.root.join(topic)
    }

    /// Record counts and group offsets for every topic in the spool
    pub async fn status(&self) -> AclResult<Vec<TopicStatus>> {
        let mut statuses = Vec::new();
        if !self.root.exists() {
            return Ok(statuses);
        }

        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| AclError::io(format!("reading spool {}", self.root.display()), e))?;
        let mut topics = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AclError::io("reading spool entry", e))?
        {
            if entry.path().is_dir() {
                topics.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        topics.sort();

        for topic in topics {
            statuses.push(self.topic_status(&topic).await?);
        }
        Ok(statuses)
    }

    pub async fn topic_status(&self, topic: &str) -> AclResult<TopicStatus> {
        let dir = self.topic_dir(topic);
        let mut partitions = Vec::with_capacity(self.partitions as usize);
        for p in 0..self.partitions {
            partitions.push(count_records(&partition_path(&dir, p)).await?);
        }

        let mut groups = BTreeMap::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| AclError::io(format!("reading {}", dir.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AclError::io("reading topic entry", e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(group) = name
                .strip_prefix("offsets-")
                .and_then(|n| n.strip_suffix(".json"))
            {
                let offsets = load_offsets(&entry.path(), self.partitions).await?;
                groups.insert(group.to_string(), offsets);
            }
        }

        Ok(TopicStatus {
            topic: topic.to_string(),
            partitions,
            groups,
        })
    }

    /// Offsets `group` has committed on `topic`, zero for untouched partitions
    pub async fn committed_offsets(&self, topic: &str, group: &str) -> AclResult<Vec<u64>> {
        load_offsets(&offsets_path(&self.topic_dir(topic), group), self.partitions).await
    }

    /// Overwrite the committed offsets of `group` on `topic`
    ///
    /// Missing partitions restart from zero. Takes effect for subscriptions
    /// opened afterwards.
    pub async fn reset_offsets(&self, topic: &str, group: &str, offsets: &[u64]) -> AclResult<()> {
        let dir = self.topic_dir(topic);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AclError::Broker(format!("creating {}: {}", dir.display(), e)))?;
        let stored: BTreeMap<u32, u64> = (0..self.partitions)
            .map(|p| (p, offsets.get(p as usize).copied().unwrap_or(0)))
            .collect();
        write_offsets(&offsets_path(&dir, group), &stored).await?;
        debug!(topic, group, ?offsets, "Reset consumer offsets");
        Ok(())
    }
}

fn partition_path(dir: &Path, partition: u32) -> PathBuf {
    dir.join(format!("partition-{}.jsonl", partition))
}

fn offsets_path(dir: &Path, group: &str) -> PathBuf {
    dir.join(format!("offsets-{}.json", group))
}

/// Number of newline-terminated lines in a partition file
async fn count_records(path: &Path) -> AclResult<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let content = fs::read(path)
        .await
        .map_err(|e| AclError::io(format!("reading {}", path.display()), e))?;
    Ok(content.iter().filter(|b| **b == b'\n').count() as u64)
}

/// Byte position of record `offset`, or of the end of the last complete
/// record when the file holds fewer
async fn byte_position(path: &Path, offset: u64) -> AclResult<(u64, u64)> {
    if offset == 0 || !path.exists() {
        return Ok((0, 0));
    }
    let content = fs::read(path)
        .await
        .map_err(|e| AclError::io(format!("reading {}", path.display()), e))?;
    let mut seen = 0;
    for (i, byte) in content.iter().enumerate() {
        if *byte == b'\n' {
            seen += 1;
            if seen == offset {
                return Ok((seen, i as u64 + 1));
            }
        }
    }
    let end = content.iter().rposition(|b| *b == b'\n').map_or(0, |i| i as u64 + 1);
    Ok((seen, end))
}

/// The complete line starting at `byte`, newline included
///
/// `None` when nothing follows `byte` or the line is not terminated yet.
async fn read_record(path: &Path, byte: u64) -> AclResult<Option<Vec<u8>>> {
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AclError::io(format!("opening {}", path.display()), e)),
    };
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(byte))
        .await
        .map_err(|e| AclError::io(format!("seeking {}", path.display()), e))?;
    let mut line = Vec::new();
    reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| AclError::io(format!("reading {}", path.display()), e))?;
    if line.last() == Some(&b'\n') {
        Ok(Some(line))
    } else {
        Ok(None)
    }
}

async fn write_offsets(path: &Path, stored: &BTreeMap<u32, u64>) -> AclResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string(stored)?)
        .await
        .map_err(|e| AclError::Broker(format!("writing {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| AclError::Broker(format!("replacing {}: {}", path.display(), e)))?;
    Ok(())
}

async fn load_offsets(path: &Path, partitions: u32) -> AclResult<Vec<u64>> {
    let mut offsets = vec![0; partitions as usize];
    if !path.exists() {
        return Ok(offsets);
    }
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| AclError::io(format!("reading {}", path.display()), e))?;
    let stored: BTreeMap<u32, u64> = serde_json::from_str(&content)?;
    for (p, offset) in stored {
        if let Some(slot) = offsets.get_mut(p as usize) {
            *slot = offset;
        }
    }
    Ok(offsets)
}

#[async_trait]
impl Broker for SpoolBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> AclResult<()> {
        let dir = self.topic_dir(topic);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AclError::Broker(format!("creating {}: {}", dir.display(), e)))?;

        let partition = partition_for(key, self.partitions);
        let record = SpoolRecord {
            key: key.to_string(),
            payload: payload.to_string(),
            published_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let path = partition_path(&dir, partition);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AclError::Broker(format!("opening {}: {}", path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AclError::Broker(format!("appending to {}: {}", path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| AclError::Broker(format!("flushing {}: {}", path.display(), e)))?;

        debug!(topic, partition, key, "Spooled record");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> AclResult<Box<dyn Subscription>> {
        let dir = self.topic_dir(topic);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AclError::Broker(format!("creating {}: {}", dir.display(), e)))?;
        let committed = load_offsets(&offsets_path(&dir, group), self.partitions).await?;

        let mut cursors = Vec::with_capacity(committed.len());
        for (p, offset) in committed.iter().enumerate() {
            let (found, byte) = byte_position(&partition_path(&dir, p as u32), *offset).await?;
            if found < *offset {
                warn!(
                    topic,
                    partition = p,
                    committed = offset,
                    found,
                    "Partition shorter than its committed offset"
                );
            }
            cursors.push(Cursor::at(*offset, byte));
        }

        Ok(Box::new(SpoolSubscription {
            dir,
            topic: topic.to_string(),
            group: group.to_string(),
            cursors,
            committed,
            next_partition: 0,
            poll_interval: self.poll_interval,
        }))
    }
}

/// Read position in one partition file
#[derive(Debug)]
struct Cursor {
    offset: u64,
    byte: u64,
    /// Start of each record handed out but not yet committed, for `rewind`
    pending: BTreeMap<u64, u64>,
}

impl Cursor {
    fn at(offset: u64, byte: u64) -> Self {
        Self {
            offset,
            byte,
            pending: BTreeMap::new(),
        }
    }
}

struct SpoolSubscription {
    dir: PathBuf,
    topic: String,
    group: String,
    cursors: Vec<Cursor>,
    committed: Vec<u64>,
    next_partition: usize,
    poll_interval: Duration,
}

impl SpoolSubscription {
    async fn persist_offsets(&self) -> AclResult<()> {
        let stored: BTreeMap<u32, u64> = self
            .committed
            .iter()
            .enumerate()
            .map(|(p, o)| (p as u32, *o))
            .collect();
        write_offsets(&offsets_path(&self.dir, &self.group), &stored).await
    }
}

#[async_trait]
impl Subscription for SpoolSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&mut self) -> AclResult<Delivery> {
        loop {
            if let Some(delivery) = self.try_fetch().await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn try_fetch(&mut self) -> AclResult<Option<Delivery>> {
        let n = self.cursors.len();
        for i in 0..n {
            let p = (self.next_partition + i) % n;
            let path = partition_path(&self.dir, p as u32);
            let cursor = &mut self.cursors[p];
            let Some(raw) = read_record(&path, cursor.byte).await? else {
                continue;
            };

            let offset = cursor.offset;
            cursor.pending.insert(offset, cursor.byte);
            cursor.byte += raw.len() as u64;
            cursor.offset += 1;
            self.next_partition = (p + 1) % n;

            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            let (key, payload) = match serde_json::from_str::<SpoolRecord>(line) {
                Ok(record) => (record.key, record.payload),
                Err(e) => {
                    // Hand the raw line on so it is dead-lettered, not lost
                    warn!(topic = %self.topic, partition = p, offset, "Corrupt spool line: {}", e);
                    (String::new(), line.to_string())
                }
            };
            return Ok(Some(Delivery {
                topic: self.topic.clone(),
                partition: p as u32,
                offset,
                key,
                payload,
            }));
        }
        Ok(None)
    }

    async fn commit(&mut self, delivery: &Delivery) -> AclResult<()> {
        let slot = self
            .committed
            .get_mut(delivery.partition as usize)
            .ok_or_else(|| AclError::Broker(format!("no partition {}", delivery.partition)))?;
        *slot = (*slot).max(delivery.offset + 1);
        let done = *slot;
        if let Some(cursor) = self.cursors.get_mut(delivery.partition as usize) {
            cursor.pending = cursor.pending.split_off(&done);
        }
        self.persist_offsets().await
    }

    fn rewind(&mut self, delivery: &Delivery) {
        let Some(cursor) = self.cursors.get_mut(delivery.partition as usize) else {
            return;
        };
        if delivery.offset >= cursor.offset {
            return;
        }
        if let Some(byte) = cursor.pending.get(&delivery.offset).copied() {
            cursor.offset = delivery.offset;
            cursor.byte = byte;
            cursor.pending.retain(|offset, _| *offset < delivery.offset);
        }
    }
}
