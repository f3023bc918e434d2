//! Inspect command - read derived projections from the cache snapshot

use crate::cache::{keys, CacheSnapshot};
use crate::cli::args::{InspectArgs, InspectTarget, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::AclResult;
use crate::ui::{self, UiContext};

/// Execute the inspect command
pub async fn execute(args: InspectArgs, config: &Config) -> AclResult<()> {
    let snapshot = CacheSnapshot::load(&ConfigManager::snapshot_path(config)).await?;

    let (title, column, entries) = match args.target {
        InspectTarget::Acl { asset } => (
            format!("ACL of asset {}", asset),
            "ACCESS",
            snapshot.hash(&keys::asset_acl(asset)),
        ),
        InspectTarget::Team { team } => (
            format!("Members of team {}", team),
            "ROLE",
            snapshot.hash(&keys::team_members(team)),
        ),
    };

    match args.format {
        OutputFormat::Table => {
            ui::grant_table(&UiContext::detect(), &title, column, snapshot.taken_at, &entries)
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for (user, value) in &entries {
                println!("{}\t{}", user, value);
            }
        }
    }

    Ok(())
}
