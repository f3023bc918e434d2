//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{AclError, AclResult};
use crate::ui::{self, Tone, UiContext};
use std::path::PathBuf;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> AclResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> AclResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> AclResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_detail(
            &ctx,
            Tone::Warn,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_detail(&ctx, Tone::Ok, "Configuration initialized", &path.display().to_string());

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> AclResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();
    apply(&mut config, key, value)?;

    manager.save(&config).await?;
    ui::step(&ctx, Tone::Ok, &format!("Set {} = {}", key, value));

    Ok(())
}

/// Set a dot-separated key on `config`
fn apply(config: &mut Config, key: &str, value: &str) -> AclResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => {
            config.general.log_format = match value {
                "text" | "json" => value.to_string(),
                _ => {
                    return Err(AclError::Validation(format!(
                        "log_format must be text or json, got {}",
                        value
                    )))
                }
            }
        }

        ["cache", "team_ttl_secs"] => config.cache.team_ttl_secs = parse_num(value)?,
        ["cache", "acl_ttl_secs"] => config.cache.acl_ttl_secs = parse_num(value)?,
        ["cache", "metadata_ttl_secs"] => config.cache.metadata_ttl_secs = parse_num(value)?,
        ["cache", "op_timeout_ms"] => config.cache.op_timeout_ms = parse_num(value)?,

        ["broker", "spool_dir"] => config.broker.spool_dir = Some(PathBuf::from(value)),
        ["broker", "partitions"] => config.broker.partitions = parse_num(value)?,
        ["broker", "team_topic"] => config.broker.team_topic = value.to_string(),
        ["broker", "asset_topic"] => config.broker.asset_topic = value.to_string(),
        ["broker", "group_id"] => config.broker.group_id = value.to_string(),
        ["broker", "poll_interval_ms"] => config.broker.poll_interval_ms = parse_num(value)?,

        ["publisher", "queue_capacity"] => config.publisher.queue_capacity = parse_num(value)?,
        ["publisher", "workers"] => config.publisher.workers = parse_num(value)?,
        ["publisher", "max_retries"] => config.publisher.max_retries = parse_num(value)?,
        ["publisher", "initial_backoff_ms"] => {
            config.publisher.initial_backoff_ms = parse_num(value)?
        }
        ["publisher", "max_backoff_ms"] => config.publisher.max_backoff_ms = parse_num(value)?,
        ["publisher", "publish_timeout_ms"] => {
            config.publisher.publish_timeout_ms = parse_num(value)?
        }

        ["consumer", "max_retries"] => config.consumer.max_retries = parse_num(value)?,
        ["consumer", "initial_backoff_ms"] => config.consumer.initial_backoff_ms = parse_num(value)?,
        ["consumer", "max_backoff_ms"] => config.consumer.max_backoff_ms = parse_num(value)?,
        ["consumer", "dead_letter_suffix"] => {
            if value.is_empty() {
                return Err(AclError::Validation(
                    "dead_letter_suffix must not be empty".to_string(),
                ));
            }
            config.consumer.dead_letter_suffix = value.to_string()
        }
        ["consumer", "resync_interval_secs"] => {
            config.consumer.resync_interval_secs = parse_num(value)?
        }
        ["consumer", "snapshot_interval_secs"] => {
            config.consumer.snapshot_interval_secs = parse_num(value)?
        }
        ["consumer", "snapshot_path"] => config.consumer.snapshot_path = Some(PathBuf::from(value)),
        ["consumer", "shutdown_timeout_secs"] => {
            config.consumer.shutdown_timeout_secs = parse_num(value)?
        }

        _ => {
            let ctx = UiContext::detect();
            ui::step_detail(&ctx, Tone::Fail, "Unknown config key", key);
            ui::hint(&ctx, "Valid keys:");
            print_valid_keys();
            return Err(AclError::Validation(format!("unknown config key {}", key)));
        }
    }

    Ok(())
}

fn parse_num<T: std::str::FromStr>(value: &str) -> AclResult<T> {
    value
        .parse()
        .map_err(|_| AclError::Validation(format!("Invalid number: {}", value)))
}

fn print_valid_keys() {
    let keys = [
        "general.log_format",
        "cache.team_ttl_secs",
        "cache.acl_ttl_secs",
        "cache.metadata_ttl_secs",
        "cache.op_timeout_ms",
        "broker.spool_dir",
        "broker.partitions",
        "broker.team_topic",
        "broker.asset_topic",
        "broker.group_id",
        "broker.poll_interval_ms",
        "publisher.queue_capacity",
        "publisher.workers",
        "publisher.max_retries",
        "publisher.initial_backoff_ms",
        "publisher.max_backoff_ms",
        "publisher.publish_timeout_ms",
        "consumer.max_retries",
        "consumer.initial_backoff_ms",
        "consumer.max_backoff_ms",
        "consumer.dead_letter_suffix",
        "consumer.resync_interval_secs",
        "consumer.snapshot_interval_secs",
        "consumer.snapshot_path",
        "consumer.shutdown_timeout_secs",
    ];

    for key in keys {
        eprintln!("  {}", key);
    }
}
