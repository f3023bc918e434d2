//! Bounded outbound event queue
//!
//! Services hand events to `EventPublisher` after their store write commits.
//! Events wait in bounded per-worker queues; a fixed pool of workers
//! publishes them with retry. An entity's events always go through the same
//! worker, so per-entity order is kept. Exhausted events are counted and
//! logged with their full payload.

use super::broker::{partition_for, Broker};
use super::envelope::{AssetEvent, TeamEvent};
use crate::config::{BrokerConfig, PublisherConfig};
use crate::error::{AclError, AclResult};
use backon::{ExponentialBuilder, Retryable};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct Outbound {
    topic: String,
    key: String,
    payload: String,
}

#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    publish_timeout: Duration,
}

/// Publisher counters
#[derive(Debug, Default)]
struct PublisherStats {
    enqueued: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the publisher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStatsSnapshot {
    pub enqueued: u64,
    pub published: u64,
    pub failed: u64,
}

struct Inner {
    enabled: bool,
    team_topic: String,
    asset_topic: String,
    senders: RwLock<Vec<mpsc::Sender<Outbound>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<PublisherStats>,
}

/// Handle for emitting domain events; cheap to clone
#[derive(Clone)]
pub struct EventPublisher {
    inner: Arc<Inner>,
}

impl EventPublisher {
    /// Spawn the worker pool on the current runtime
    pub fn start(
        broker: Arc<dyn Broker>,
        topics: &BrokerConfig,
        config: &PublisherConfig,
    ) -> Self {
        let workers = config.workers.max(1);
        let per_worker = (config.queue_capacity / workers).max(1);
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            publish_timeout: config.publish_timeout(),
        };
        let stats = Arc::new(PublisherStats::default());

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::channel(per_worker);
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(
                id,
                rx,
                broker.clone(),
                policy.clone(),
                stats.clone(),
            )));
        }
        info!(
            "Event publisher started: {} workers, {} slots each",
            workers, per_worker
        );

        Self {
            inner: Arc::new(Inner {
                enabled: true,
                team_topic: topics.team_topic.clone(),
                asset_topic: topics.asset_topic.clone(),
                senders: RwLock::new(senders),
                workers: Mutex::new(handles),
                stats,
            }),
        }
    }

    /// Publisher that drops every event
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                enabled: false,
                team_topic: String::new(),
                asset_topic: String::new(),
                senders: RwLock::new(Vec::new()),
                workers: Mutex::new(Vec::new()),
                stats: Arc::new(PublisherStats::default()),
            }),
        }
    }

    pub async fn publish_team(&self, event: &TeamEvent) {
        let topic = self.inner.team_topic.clone();
        self.enqueue(topic, event.key(), event).await
    }

    pub async fn publish_asset(&self, event: &AssetEvent) {
        let topic = self.inner.asset_topic.clone();
        self.enqueue(topic, event.key(), event).await
    }

    pub fn stats(&self) -> PublisherStatsSnapshot {
        let s = &self.inner.stats;
        PublisherStatsSnapshot {
            enqueued: s.enqueued.load(Ordering::Relaxed),
            published: s.published.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait for queued events to be published
    ///
    /// Returns false if the workers did not finish within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.senders.write().clear();
        let handles: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return true;
        }
        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(_) => {
                debug!("Event publisher drained");
                true
            }
            Err(_) => {
                warn!("Event publisher did not drain within {:?}", timeout);
                false
            }
        }
    }

    async fn enqueue<E: Serialize>(&self, topic: String, key: String, event: &E) {
        if !self.inner.enabled {
            debug!("Publishing disabled, dropping event for {}", key);
            return;
        }

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                self.inner.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("Could not encode event for {}: {}", key, e);
                return;
            }
        };

        let sender = {
            let senders = self.inner.senders.read();
            if senders.is_empty() {
                None
            } else {
                let idx = partition_for(&key, senders.len() as u32) as usize;
                Some(senders[idx].clone())
            }
        };
        let Some(sender) = sender else {
            self.inner.stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(topic = %topic, key = %key, payload = %payload, "Publisher is shut down, event dropped");
            return;
        };

        let outbound = Outbound {
            topic,
            key,
            payload,
        };
        // Waits for a free slot when the queue is full
        match sender.send(outbound).await {
            Ok(()) => {
                self.inner.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::SendError(lost)) => {
                self.inner.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(topic = %lost.topic, key = %lost.key, payload = %lost.payload, "Publisher queue closed, event dropped");
            }
        }
    }
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<Outbound>,
    broker: Arc<dyn Broker>,
    policy: RetryPolicy,
    stats: Arc<PublisherStats>,
) {
    while let Some(msg) = rx.recv().await {
        match deliver(broker.as_ref(), &msg, &policy).await {
            Ok(()) => {
                stats.published.fetch_add(1, Ordering::Relaxed);
                debug!(topic = %msg.topic, key = %msg.key, "Event published");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    topic = %msg.topic,
                    key = %msg.key,
                    payload = %msg.payload,
                    "Dropping event after {} retries: {}",
                    policy.max_retries,
                    e
                );
            }
        }
    }
    debug!("Publisher worker {} stopped", id);
}

async fn deliver(broker: &dyn Broker, msg: &Outbound, policy: &RetryPolicy) -> AclResult<()> {
    let backoff = ExponentialBuilder::default()
        .with_min_delay(policy.initial_backoff)
        .with_max_delay(policy.max_backoff)
        .with_max_times(policy.max_retries);
    let limit = policy.publish_timeout;

    (|| async move {
        match tokio::time::timeout(limit, broker.publish(&msg.topic, &msg.key, &msg.payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(AclError::Timeout(format!("publish to {} after {:?}", msg.topic, limit))),
        }
    })
    .retry(backoff)
    .sleep(tokio::time::sleep)
    .when(|e: &AclError| e.is_retryable())
    .notify(|e: &AclError, dur: Duration| {
        warn!(
            topic = %msg.topic,
            backoff_ms = dur.as_millis() as u64,
            "Publish failed, retrying: {}",
            e
        );
    })
    .await
}
