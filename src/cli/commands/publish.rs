//! Publish command - append one event to the spool

use crate::cli::args::{PublishArgs, PublishEvent};
use crate::config::{Config, ConfigManager};
use crate::error::{AclError, AclResult};
use crate::events::{
    AssetEvent, AssetEventType, EventPublisher, SpoolBroker, TeamEvent, TeamEventType,
};
use crate::ui::{self, Tone, UiContext};
use std::sync::Arc;

/// Execute the publish command
pub async fn execute(args: PublishArgs, config: &Config) -> AclResult<()> {
    let ctx = UiContext::detect();
    ConfigManager::ensure_state_dirs(config).await?;

    let broker = Arc::new(SpoolBroker::from_config(
        ConfigManager::spool_dir(config),
        &config.broker,
    ));
    let publisher = EventPublisher::start(broker, &config.broker, &config.publisher);

    let summary = match args.event {
        PublishEvent::Team {
            event_type,
            team,
            by,
            target,
        } => {
            let event_type = TeamEventType::from(event_type.to_uppercase());
            if let TeamEventType::Unknown(name) = &event_type {
                return Err(AclError::Validation(format!("unknown team event type {}", name)));
            }
            let event = TeamEvent::new(event_type, team, by, target.unwrap_or(by));
            publisher.publish_team(&event).await;
            format!("{} team {}", event.event_type, team)
        }
        PublishEvent::Asset {
            event_type,
            asset,
            owner,
            by,
            target,
            level,
        } => {
            let (asset_type, action) = match AssetEventType::from(event_type.to_uppercase()) {
                AssetEventType::Known(asset_type, action) => (asset_type, action),
                AssetEventType::Unknown(name) => {
                    return Err(AclError::Validation(format!("unknown asset event type {}", name)))
                }
            };
            let mut event = AssetEvent::new(asset_type, action, asset, owner, by.unwrap_or(owner));
            if let Some(target) = target {
                event = event.with_target(target);
            }
            if let Some(level) = level {
                event = event.with_level(level);
            }
            publisher.publish_asset(&event).await;
            format!("{} asset {}", event.event_type, asset)
        }
    };

    let drained = publisher.shutdown(config.consumer.shutdown_timeout()).await;
    let stats = publisher.stats();
    if !drained || stats.failed > 0 {
        return Err(AclError::Broker(format!("could not publish {}", summary)));
    }

    ui::step(&ctx, Tone::Ok, &format!("Published {}", summary));
    Ok(())
}
