//! Pull loop: fetch, dispatch, commit
//!
//! A record's offset is committed only after the handler succeeded, skipped
//! an unknown event type, or the record was written to the dead-letter
//! topic. Retryable handler errors back off and try again; anything else is
//! dead-lettered at once. If the dead-letter write fails the record is
//! rewound and fetched again.

use super::handlers::{Disposition, EventHandler};
use crate::config::ConsumerConfig;
use crate::error::{AclError, AclResult};
use crate::events::{Broker, Delivery, Subscription};
use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Retry and dead-letter settings for one loop
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub dead_letter_topic: String,
}

impl ConsumerSettings {
    pub fn for_topic(topic: &str, config: &ConsumerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            dead_letter_topic: config.dead_letter_topic(topic),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_retries)
    }
}

/// Loop counters, shared with whoever wants to watch them
#[derive(Debug, Default)]
pub struct ConsumerStats {
    processed: AtomicU64,
    ignored: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub processed: u64,
    pub ignored: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

impl std::ops::AddAssign for ConsumerStatsSnapshot {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.ignored += other.ignored;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
    }
}

/// Record written to the dead-letter topic
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub source_topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

enum HandleFailure {
    /// Shutdown arrived during a backoff
    Interrupted,
    Failed(AclError),
}

enum Step {
    Committed,
    /// Not committed; the record was rewound
    Deferred,
    Interrupted,
}

/// Sequential consumer for one topic
pub struct ConsumerLoop {
    subscription: Box<dyn Subscription>,
    handler: Arc<dyn EventHandler>,
    dead_letter: Arc<dyn Broker>,
    settings: ConsumerSettings,
    stats: Arc<ConsumerStats>,
}

impl ConsumerLoop {
    pub fn new(
        subscription: Box<dyn Subscription>,
        handler: Arc<dyn EventHandler>,
        dead_letter: Arc<dyn Broker>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            subscription,
            handler,
            dead_letter,
            settings,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Run until `cancel` fires
    ///
    /// Cancellation is observed while waiting for a record and during retry
    /// backoff, never in the middle of a handler call. A record interrupted
    /// that way is left uncommitted.
    pub async fn run(mut self, cancel: CancellationToken) -> ConsumerStatsSnapshot {
        let topic = self.subscription.topic().to_string();
        info!(topic = %topic, handler = self.handler.name(), "Consumer started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.subscription.fetch() => fetched,
            };

            let delivery = match fetched {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(topic = %topic, "Fetch failed: {}", e);
                    if pause(self.settings.initial_backoff, &cancel).await {
                        break;
                    }
                    continue;
                }
            };

            match self.process(&delivery, &cancel).await {
                Step::Committed => {}
                Step::Deferred => {
                    if pause(self.settings.initial_backoff, &cancel).await {
                        break;
                    }
                }
                Step::Interrupted => break,
            }
        }

        let stats = self.stats.snapshot();
        info!(
            topic = %topic,
            processed = stats.processed,
            dead_lettered = stats.dead_lettered,
            "Consumer stopped"
        );
        stats
    }

    /// Process every ready record, then return
    pub async fn drain(mut self) -> AclResult<ConsumerStatsSnapshot> {
        let cancel = CancellationToken::new();
        while let Some(delivery) = self.subscription.try_fetch().await? {
            match self.process(&delivery, &cancel).await {
                Step::Committed => {}
                Step::Deferred | Step::Interrupted => {
                    return Err(AclError::Broker(format!(
                        "could not settle {}/{} offset {}",
                        delivery.topic, delivery.partition, delivery.offset
                    )));
                }
            }
        }
        Ok(self.stats.snapshot())
    }

    async fn process(&mut self, delivery: &Delivery, cancel: &CancellationToken) -> Step {
        match self.handle_with_retry(&delivery.payload, cancel).await {
            Ok(Disposition::Applied) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Disposition::Ignored) => {
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            }
            Err(HandleFailure::Interrupted) => {
                debug!(topic = %delivery.topic, offset = delivery.offset, "Left uncommitted on shutdown");
                self.subscription.rewind(delivery);
                return Step::Interrupted;
            }
            Err(HandleFailure::Failed(e)) => {
                if let Err(dl) = self.send_to_dead_letter(delivery, &e).await {
                    error!(
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Dead-letter write failed, will redeliver: {}",
                        dl
                    );
                    self.subscription.rewind(delivery);
                    return Step::Deferred;
                }
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
        }

        match self.subscription.commit(delivery).await {
            Ok(()) => Step::Committed,
            Err(e) => {
                warn!(topic = %delivery.topic, offset = delivery.offset, "Commit failed: {}", e);
                self.subscription.rewind(delivery);
                Step::Deferred
            }
        }
    }

    async fn handle_with_retry(
        &self,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<Disposition, HandleFailure> {
        let mut delays = self.settings.backoff().build();
        loop {
            match self.handler.handle(payload).await {
                Ok(disposition) => return Ok(disposition),
                Err(e) if e.is_retryable() => match delays.next() {
                    Some(delay) => {
                        self.stats.retried.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            handler = self.handler.name(),
                            backoff_ms = delay.as_millis() as u64,
                            "Handler failed, retrying: {}",
                            e
                        );
                        if pause(delay, cancel).await {
                            return Err(HandleFailure::Interrupted);
                        }
                    }
                    None => return Err(HandleFailure::Failed(e)),
                },
                Err(e) => return Err(HandleFailure::Failed(e)),
            }
        }
    }

    async fn send_to_dead_letter(&self, delivery: &Delivery, cause: &AclError) -> AclResult<()> {
        let record = DeadLetter {
            source_topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
            key: delivery.key.clone(),
            payload: delivery.payload.clone(),
            error: cause.to_string(),
            failed_at: Utc::now(),
        };
        let payload = serde_json::to_string(&record)?;
        let key = if delivery.key.is_empty() {
            format!("{}-{}", delivery.partition, delivery.offset)
        } else {
            delivery.key.clone()
        };
        self.dead_letter
            .publish(&self.settings.dead_letter_topic, &key, &payload)
            .await?;
        warn!(
            topic = %delivery.topic,
            offset = delivery.offset,
            dead_letter_topic = %self.settings.dead_letter_topic,
            "Dead-lettered event: {}",
            cause
        );
        Ok(())
    }
}

/// Sleep unless cancelled first; true means cancelled
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryBroker;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Fails with a retryable error a set number of times, then succeeds
    struct Flaky {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EventHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, payload: &str) -> AclResult<Disposition> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if payload == "poison" {
                return Err(AclError::Validation("malformed event".into()));
            }
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(AclError::Cache("connection reset".into()));
            }
            Ok(Disposition::Applied)
        }
    }

    fn settings(max_retries: usize) -> ConsumerSettings {
        ConsumerSettings {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            dead_letter_topic: "t.dlq".to_string(),
        }
    }

    async fn consumer(
        broker: &MemoryBroker,
        handler: Arc<Flaky>,
        max_retries: usize,
    ) -> ConsumerLoop {
        let sub = broker.subscribe("t", "g").await.unwrap();
        ConsumerLoop::new(sub, handler, Arc::new(broker.clone()), settings(max_retries))
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_committed() {
        let broker = MemoryBroker::new(1);
        broker.publish("t", "k", "ok").await.unwrap();
        let handler = Arc::new(Flaky::new(2));

        let stats = consumer(&broker, handler.clone(), 3).await.drain().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(broker.lag("t", "g"), 0);
        assert!(broker.records("t.dlq").is_empty());
    }

    #[tokio::test]
    async fn poison_is_dead_lettered_without_retry() {
        let broker = MemoryBroker::new(1);
        broker.publish("t", "k", "poison").await.unwrap();
        broker.publish("t", "k", "ok").await.unwrap();
        let handler = Arc::new(Flaky::new(0));

        let stats = consumer(&broker, handler.clone(), 3).await.drain().await.unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        let dead = broker.records("t.dlq");
        assert_eq!(dead.len(), 1);
        let letter: DeadLetter = serde_json::from_str(&dead[0].payload).unwrap();
        assert_eq!(letter.payload, "poison");
        assert_eq!(letter.source_topic, "t");
        assert_eq!(broker.lag("t", "g"), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_are_dead_lettered() {
        let broker = MemoryBroker::new(1);
        broker.publish("t", "k", "ok").await.unwrap();
        let handler = Arc::new(Flaky::new(10));

        let stats = consumer(&broker, handler, 2).await.drain().await.unwrap();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(broker.records("t.dlq").len(), 1);
    }

    #[tokio::test]
    async fn failed_dead_letter_leaves_offset_uncommitted() {
        let broker = MemoryBroker::new(1);
        broker.publish("t", "k", "poison").await.unwrap();
        let handler = Arc::new(Flaky::new(0));
        let consumer = consumer(&broker, handler, 0).await;
        broker.fail_next_publishes(1);

        assert!(consumer.drain().await.is_err());
        assert_eq!(broker.lag("t", "g"), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let broker = MemoryBroker::new(1);
        let handler = Arc::new(Flaky::new(0));
        let consumer = consumer(&broker, handler, 0).await;
        let cancel = CancellationToken::new();

        let task = tokio::spawn(consumer.run(cancel.clone()));
        broker.publish("t", "k", "ok").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(broker.lag("t", "g"), 0);
    }

    #[tokio::test]
    async fn shutdown_during_backoff_skips_commit() {
        let broker = MemoryBroker::new(1);
        broker.publish("t", "k", "ok").await.unwrap();
        let handler = Arc::new(Flaky::new(100));
        let sub = broker.subscribe("t", "g").await.unwrap();
        let consumer = ConsumerLoop::new(
            sub,
            handler,
            Arc::new(broker.clone()),
            ConsumerSettings {
                max_retries: 100,
                initial_backoff: Duration::from_millis(200),
                max_backoff: Duration::from_millis(200),
                dead_letter_topic: "t.dlq".to_string(),
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(broker.lag("t", "g"), 1);
        assert!(broker.records("t.dlq").is_empty());
    }
}
