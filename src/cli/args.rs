//! CLI argument definitions using clap derive

use crate::access::AccessLevel;
use crate::consumer::Topics;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

/// aclsync - access-control cache sync for shared folders and notes
///
/// Runs the event consumer that keeps the derived ACL and membership caches
/// in step with team and asset events, and inspects its state.
#[derive(Parser, Debug)]
#[command(name = "aclsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ACLSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the cache updater against the spool until Ctrl-C
    Consume(ConsumeArgs),

    /// Append an event to the spool
    Publish(PublishArgs),

    /// Show spool topics, committed offsets and lag
    Status(StatusArgs),

    /// Read the derived caches from the last snapshot
    Inspect(InspectArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the consume command
#[derive(Parser, Debug)]
pub struct ConsumeArgs {
    /// Topics to consume
    #[arg(short, long, value_enum, default_value = "all")]
    pub topic: TopicArg,

    /// Process what is already in the spool, then exit
    #[arg(long)]
    pub drain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TopicArg {
    Team,
    Asset,
    All,
}

impl From<TopicArg> for Topics {
    fn from(arg: TopicArg) -> Self {
        match arg {
            TopicArg::Team => Topics::Team,
            TopicArg::Asset => Topics::Asset,
            TopicArg::All => Topics::All,
        }
    }
}

/// Arguments for the publish command
#[derive(Parser, Debug)]
pub struct PublishArgs {
    #[command(subcommand)]
    pub event: PublishEvent,
}

#[derive(Subcommand, Debug)]
pub enum PublishEvent {
    /// Team activity event (TEAM_CREATED, MEMBER_ADDED, ...)
    Team {
        /// Event type
        #[arg(long = "type")]
        event_type: String,

        #[arg(long)]
        team: Uuid,

        /// Acting user
        #[arg(long)]
        by: Uuid,

        /// User the event is about (defaults to --by)
        #[arg(long)]
        target: Option<Uuid>,
    },

    /// Asset change event (FOLDER_SHARED, NOTE_DELETED, ...)
    Asset {
        /// Event type
        #[arg(long = "type")]
        event_type: String,

        #[arg(long)]
        asset: Uuid,

        /// Asset owner
        #[arg(long)]
        owner: Uuid,

        /// Acting user (defaults to --owner)
        #[arg(long)]
        by: Option<Uuid>,

        /// User a share or unshare applies to
        #[arg(long)]
        target: Option<Uuid>,

        /// Level granted by a share
        #[arg(long, value_parser = parse_level)]
        level: Option<AccessLevel>,
    },
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub target: InspectTarget,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum InspectTarget {
    /// Cached ACL of a folder or note
    Acl { asset: Uuid },

    /// Cached membership of a team
    Team { team: Uuid },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., broker.group_id)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Strict level parsing; unknown names are rejected rather than read as NONE
fn parse_level(s: &str) -> Result<AccessLevel, String> {
    s.parse::<AccessLevel>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_consume() {
        let cli = Cli::parse_from(["aclsync", "consume"]);
        match cli.command {
            Commands::Consume(args) => {
                assert_eq!(args.topic, TopicArg::All);
                assert!(!args.drain);
            }
            _ => panic!("expected Consume command"),
        }

        let cli = Cli::parse_from(["aclsync", "consume", "--topic", "asset", "--drain"]);
        match cli.command {
            Commands::Consume(args) => {
                assert_eq!(Topics::from(args.topic), Topics::Asset);
                assert!(args.drain);
            }
            _ => panic!("expected Consume command"),
        }
    }

    #[test]
    fn cli_parses_asset_publish() {
        let asset = Uuid::new_v4().to_string();
        let owner = Uuid::new_v4().to_string();
        let cli = Cli::parse_from([
            "aclsync",
            "publish",
            "asset",
            "--type",
            "FOLDER_SHARED",
            "--asset",
            asset.as_str(),
            "--owner",
            owner.as_str(),
            "--target",
            owner.as_str(),
            "--level",
            "write",
        ]);
        match cli.command {
            Commands::Publish(PublishArgs {
                event: PublishEvent::Asset { event_type, level, .. },
            }) => {
                assert_eq!(event_type, "FOLDER_SHARED");
                assert_eq!(level, Some(AccessLevel::Write));
            }
            _ => panic!("expected asset publish"),
        }
    }

    #[test]
    fn parse_level_is_strict() {
        assert_eq!(parse_level("owner").unwrap(), AccessLevel::Owner);
        assert!(parse_level("admin").is_err());
    }

    #[test]
    fn cli_rejects_bad_uuid() {
        let result = Cli::try_parse_from([
            "aclsync", "publish", "team", "--type", "TEAM_CREATED", "--team", "nope", "--by",
            "nope",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_inspect_with_trailing_format() {
        let id = Uuid::new_v4();
        let raw = id.to_string();
        let cli = Cli::parse_from(["aclsync", "inspect", "acl", raw.as_str(), "--format", "json"]);
        match cli.command {
            Commands::Inspect(args) => {
                assert!(matches!(args.format, OutputFormat::Json));
                assert!(matches!(args.target, InspectTarget::Acl { asset } if asset == id));
            }
            _ => panic!("expected Inspect command"),
        }
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["aclsync", "status"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["aclsync", "-v", "status"]);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::parse_from(["aclsync", "-vv", "status"]);
        assert_eq!(cli.verbose, 2);
    }
}
