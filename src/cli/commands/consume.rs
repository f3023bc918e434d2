//! Consume command - run the cache updater against the spool

use crate::cache::{CacheSnapshot, MemoryCache};
use crate::cli::args::ConsumeArgs;
use crate::config::{Config, ConfigManager};
use crate::consumer::{CacheUpdater, Topics};
use crate::error::{AclError, AclResult};
use crate::events::SpoolBroker;
use crate::ui::{self, Tone, UiContext};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Execute the consume command
pub async fn execute(args: ConsumeArgs, config: &Config) -> AclResult<()> {
    let ctx = UiContext::detect();
    ConfigManager::ensure_state_dirs(config).await?;

    let spool = ConfigManager::spool_dir(config);
    let broker = Arc::new(SpoolBroker::from_config(spool.clone(), &config.broker));
    let cache = Arc::new(MemoryCache::new());
    let topics: Topics = args.topic.into();

    let checkpoint = Checkpoint {
        cache: cache.clone(),
        broker: broker.clone(),
        topics: topics.names(&config.broker),
        group: config.broker.group_id.clone(),
        path: ConfigManager::snapshot_path(config),
    };
    checkpoint.restore(config).await?;

    let updater = CacheUpdater::new(broker, cache, config).topics(topics);

    if args.drain {
        let drained = updater.drain().await;
        // Whatever was committed before a failure is only durable once saved
        let saved = checkpoint.save().await;
        let stats = drained?;
        saved?;
        ui::consumer_report(&ctx, &stats);
        ui::field(&ctx, "snapshot", &checkpoint.path.display().to_string());
        return Ok(());
    }

    ui::intro(&ctx, "aclsync consume");
    ui::field(&ctx, "spool", &spool.display().to_string());
    ui::field(&ctx, "group", &config.broker.group_id);
    ui::hint(&ctx, "Press Ctrl-C to stop");

    let cancel = CancellationToken::new();
    let handle = updater.spawn(cancel.clone()).await?;
    let writer = spawn_snapshot_writer(
        checkpoint.clone(),
        config.consumer.snapshot_interval_secs,
        cancel.child_token(),
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AclError::io("waiting for Ctrl-C", e))?;
    info!("Shutdown requested");

    let stats = handle.shutdown(config.consumer.shutdown_timeout()).await;
    if let Some(writer) = writer {
        let _ = writer.await;
    }
    checkpoint.save().await?;

    match stats {
        Some(stats) => {
            ui::consumer_report(&ctx, &stats);
            ui::outro(&ctx, Tone::Ok, "Consumer stopped");
        }
        None => ui::outro(
            &ctx,
            Tone::Warn,
            "Consumer did not stop in time; uncommitted events will be redelivered",
        ),
    }

    Ok(())
}

/// The cache snapshot together with the group offsets it covers
#[derive(Clone)]
struct Checkpoint {
    cache: Arc<MemoryCache>,
    broker: Arc<SpoolBroker>,
    topics: Vec<String>,
    group: String,
    path: PathBuf,
}

impl Checkpoint {
    /// Offsets are read before the cache is copied, so every event they
    /// cover is already in the copy
    async fn save(&self) -> AclResult<()> {
        let mut offsets = BTreeMap::new();
        for topic in &self.topics {
            let committed = self.broker.committed_offsets(topic, &self.group).await?;
            offsets.insert(topic.clone(), committed);
        }
        self.cache.purge_expired();
        let mut snapshot = self.cache.snapshot();
        snapshot.offsets = offsets;
        snapshot.save(&self.path).await
    }

    /// Seed the cache from the last snapshot and move the group back to the
    /// offsets it covers; without a snapshot every topic replays from the start
    async fn restore(&self, config: &Config) -> AclResult<()> {
        let snapshot = match CacheSnapshot::load(&self.path).await {
            Ok(snapshot) => Some(snapshot),
            Err(AclError::NotFound(_)) => None,
            Err(AclError::Json(e)) => {
                warn!("Ignoring unreadable snapshot {}: {}", self.path.display(), e);
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(snapshot) = &snapshot {
            let restored = snapshot
                .restore_into(self.cache.as_ref(), config.cache.team_ttl(), config.cache.acl_ttl())
                .await?;
            debug!("Restored {} cache keys from {}", restored, self.path.display());
        }

        for topic in &self.topics {
            let offsets = snapshot.as_ref().map_or(&[][..], |s| s.offsets_for(topic));
            self.broker.reset_offsets(topic, &self.group, offsets).await?;
        }
        Ok(())
    }
}

fn spawn_snapshot_writer(
    checkpoint: Checkpoint,
    interval_secs: u64,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = checkpoint.save().await {
                        warn!("Could not write cache snapshot: {}", e);
                    }
                }
            }
        }
    }))
}
