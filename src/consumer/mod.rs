//! Event consumer and cache updater
//!
//! One `ConsumerLoop` per topic feeds a handler that keeps the derived
//! projections in step with the event stream. `CacheUpdater` wires the
//! loops to a broker and a cache and owns their lifecycle.

mod handlers;
mod projection;
mod reconcile;
mod runner;

pub use handlers::{AssetChangeHandler, Disposition, EventHandler, TeamActivityHandler};
pub use projection::{AssetAclCache, TeamMembershipCache};
pub use reconcile::{Reconciler, ResyncReport};
pub use runner::{ConsumerLoop, ConsumerSettings, ConsumerStats, ConsumerStatsSnapshot, DeadLetter};

use crate::cache::CacheStore;
use crate::config::{BrokerConfig, Config};
use crate::error::AclResult;
use crate::events::Broker;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Which topics a `CacheUpdater` consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topics {
    Team,
    Asset,
    All,
}

impl Topics {
    fn team(self) -> bool {
        matches!(self, Topics::Team | Topics::All)
    }

    fn asset(self) -> bool {
        matches!(self, Topics::Asset | Topics::All)
    }

    /// Configured topic names in consume order
    pub fn names(self, broker: &BrokerConfig) -> Vec<String> {
        let mut names = Vec::new();
        if self.team() {
            names.push(broker.team_topic.clone());
        }
        if self.asset() {
            names.push(broker.asset_topic.clone());
        }
        names
    }
}

/// Consumer loops plus the optional periodic resync
pub struct CacheUpdater {
    broker: Arc<dyn Broker>,
    config: Config,
    acl: AssetAclCache,
    members: TeamMembershipCache,
    topics: Topics,
    reconciler: Option<Reconciler>,
}

impl CacheUpdater {
    pub fn new(broker: Arc<dyn Broker>, cache: Arc<dyn CacheStore>, config: &Config) -> Self {
        let ttl = config.cache.acl_ttl();
        Self {
            broker,
            config: config.clone(),
            acl: AssetAclCache::new(cache.clone(), ttl),
            members: TeamMembershipCache::new(cache, ttl),
            topics: Topics::All,
            reconciler: None,
        }
    }

    pub fn topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    /// Run `reconciler` every `consumer.resync_interval_secs`
    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn acl(&self) -> &AssetAclCache {
        &self.acl
    }

    pub fn members(&self) -> &TeamMembershipCache {
        &self.members
    }

    async fn build_loops(&self) -> AclResult<Vec<ConsumerLoop>> {
        let broker = &self.config.broker;
        let mut wiring: Vec<(&str, Arc<dyn EventHandler>)> = Vec::new();
        if self.topics.team() {
            let handler: Arc<dyn EventHandler> =
                Arc::new(TeamActivityHandler::new(self.members.clone()));
            wiring.push((broker.team_topic.as_str(), handler));
        }
        if self.topics.asset() {
            let handler: Arc<dyn EventHandler> = Arc::new(AssetChangeHandler::new(self.acl.clone()));
            wiring.push((broker.asset_topic.as_str(), handler));
        }

        let mut loops = Vec::with_capacity(wiring.len());
        for (topic, handler) in wiring {
            let subscription = self.broker.subscribe(topic, &broker.group_id).await?;
            loops.push(ConsumerLoop::new(
                subscription,
                handler,
                self.broker.clone(),
                ConsumerSettings::for_topic(topic, &self.config.consumer),
            ));
        }
        Ok(loops)
    }

    /// Start every loop on its own task
    pub async fn spawn(&self, cancel: CancellationToken) -> AclResult<UpdaterHandle> {
        let mut tasks = Vec::new();
        for consumer in self.build_loops().await? {
            tasks.push(tokio::spawn(consumer.run(cancel.child_token())));
        }

        let interval = self.config.consumer.resync_interval_secs;
        let resync = match (&self.reconciler, interval) {
            (Some(reconciler), secs) if secs > 0 => Some(tokio::spawn(
                reconciler
                    .clone()
                    .run_periodic(Duration::from_secs(secs), cancel.child_token()),
            )),
            _ => None,
        };

        info!(loops = tasks.len(), resync = resync.is_some(), "Cache updater running");
        Ok(UpdaterHandle {
            cancel,
            tasks,
            resync,
        })
    }

    /// Process everything already on the topics, then stop
    pub async fn drain(&self) -> AclResult<ConsumerStatsSnapshot> {
        let mut total = ConsumerStatsSnapshot::default();
        for consumer in self.build_loops().await? {
            total += consumer.drain().await?;
        }
        Ok(total)
    }
}

/// Running cache updater
pub struct UpdaterHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<ConsumerStatsSnapshot>>,
    resync: Option<JoinHandle<()>>,
}

impl UpdaterHandle {
    /// Cancel the loops and wait up to `timeout` for them to stop
    ///
    /// Returns the combined stats, or `None` if the loops did not stop in time.
    pub async fn shutdown(self, timeout: Duration) -> Option<ConsumerStatsSnapshot> {
        self.cancel.cancel();

        let loops = join_all(self.tasks);
        let joined = match tokio::time::timeout(timeout, loops).await {
            Ok(results) => results,
            Err(_) => {
                warn!("Consumer loops did not stop within {:?}", timeout);
                return None;
            }
        };

        if let Some(resync) = self.resync {
            let _ = tokio::time::timeout(timeout, resync).await;
        }

        let mut total = ConsumerStatsSnapshot::default();
        for result in joined {
            match result {
                Ok(stats) => total += stats,
                Err(e) => warn!("Consumer task failed: {}", e),
            }
        }
        Some(total)
    }
}
