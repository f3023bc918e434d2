//! In-process broker used by tests and single-process deployments

use super::broker::{partition_for, Broker, Delivery, Subscription};
use crate::error::{AclError, AclResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone)]
struct Record {
    key: String,
    payload: String,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Vec<Vec<Record>>>,
    committed: HashMap<(String, String), Vec<u64>>,
}

impl State {
    fn topic_mut(&mut self, topic: &str, partitions: u32) -> &mut Vec<Vec<Record>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize])
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
    partitions: u32,
    failing_publishes: AtomicUsize,
}

/// Partitioned topics held in memory
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new(partitions: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                partitions: partitions.max(1),
                failing_publishes: AtomicUsize::new(0),
            }),
        }
    }

    /// Make the next `n` publishes fail with a retryable broker error
    pub fn fail_next_publishes(&self, n: usize) {
        self.shared.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Every record on a topic, partition by partition
    pub fn records(&self, topic: &str) -> Vec<Delivery> {
        let state = self.shared.state.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(p, records)| {
                records.iter().enumerate().map(move |(offset, r)| Delivery {
                    topic: topic.to_string(),
                    partition: p as u32,
                    offset: offset as u64,
                    key: r.key.clone(),
                    payload: r.payload.clone(),
                })
            })
            .collect()
    }

    /// Records not yet committed by `group`
    pub fn lag(&self, topic: &str, group: &str) -> u64 {
        let state = self.shared.state.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return 0;
        };
        let committed = state
            .committed
            .get(&(group.to_string(), topic.to_string()));
        partitions
            .iter()
            .enumerate()
            .map(|(p, records)| {
                let done = committed.and_then(|c| c.get(p)).copied().unwrap_or(0);
                (records.len() as u64).saturating_sub(done)
            })
            .sum()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> AclResult<()> {
        let failing = self.shared.failing_publishes.load(Ordering::SeqCst);
        if failing > 0 {
            self.shared
                .failing_publishes
                .store(failing - 1, Ordering::SeqCst);
            return Err(AclError::Broker(format!("leader not available for {}", topic)));
        }

        let partition = partition_for(key, self.shared.partitions);
        {
            let mut state = self.shared.state.lock();
            let topic_records = state.topic_mut(topic, self.shared.partitions);
            topic_records[partition as usize].push(Record {
                key: key.to_string(),
                payload: payload.to_string(),
            });
        }
        debug!(topic, partition, key, "Published record");
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> AclResult<Box<dyn Subscription>> {
        let positions = {
            let mut state = self.shared.state.lock();
            state.topic_mut(topic, self.shared.partitions);
            state
                .committed
                .entry((group.to_string(), topic.to_string()))
                .or_insert_with(|| vec![0; self.shared.partitions as usize])
                .clone()
        };
        Ok(Box::new(MemorySubscription {
            shared: self.shared.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            positions,
            next_partition: 0,
        }))
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    positions: Vec<u64>,
    next_partition: usize,
}

impl MemorySubscription {
    /// Round-robin over partitions so one busy key cannot starve the rest
    fn take_next(&mut self) -> Option<Delivery> {
        let state = self.shared.state.lock();
        let partitions = state.topics.get(&self.topic)?;
        let n = partitions.len();
        for i in 0..n {
            let p = (self.next_partition + i) % n;
            let position = self.positions[p] as usize;
            if let Some(record) = partitions[p].get(position) {
                self.positions[p] += 1;
                self.next_partition = (p + 1) % n;
                return Some(Delivery {
                    topic: self.topic.clone(),
                    partition: p as u32,
                    offset: position as u64,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&mut self) -> AclResult<Delivery> {
        let shared = self.shared.clone();
        loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(delivery) = self.take_next() {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn try_fetch(&mut self) -> AclResult<Option<Delivery>> {
        Ok(self.take_next())
    }

    async fn commit(&mut self, delivery: &Delivery) -> AclResult<()> {
        let mut state = self.shared.state.lock();
        let committed = state
            .committed
            .entry((self.group.clone(), self.topic.clone()))
            .or_insert_with(|| vec![0; self.positions.len()]);
        let slot = committed
            .get_mut(delivery.partition as usize)
            .ok_or_else(|| AclError::Broker(format!("no partition {}", delivery.partition)))?;
        *slot = (*slot).max(delivery.offset + 1);
        Ok(())
    }

    fn rewind(&mut self, delivery: &Delivery) {
        if let Some(position) = self.positions.get_mut(delivery.partition as usize) {
            *position = (*position).min(delivery.offset);
        }
    }
}
