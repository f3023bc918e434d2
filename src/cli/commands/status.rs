//! Status command - spool topics, offsets and lag

use crate::cli::args::{OutputFormat, StatusArgs};
use crate::config::{Config, ConfigManager};
use crate::error::AclResult;
use crate::events::{SpoolBroker, TopicStatus};
use crate::ui::{self, TopicRow, UiContext};

fn topic_row(status: &TopicStatus, config: &Config) -> TopicRow {
    TopicRow {
        topic: status.topic.clone(),
        records: status.total(),
        lag: status.lag(&config.broker.group_id),
        dead_letter: status.topic.ends_with(&config.consumer.dead_letter_suffix),
    }
}

/// Execute the status command
pub async fn execute(args: StatusArgs, config: &Config) -> AclResult<()> {
    let spool = ConfigManager::spool_dir(config);
    let broker = SpoolBroker::from_config(spool.clone(), &config.broker);
    let rows: Vec<TopicRow> = broker
        .status()
        .await?
        .iter()
        .map(|s| topic_row(s, config))
        .collect();

    match args.format {
        OutputFormat::Table => ui::topic_table(
            &UiContext::detect(),
            &spool.display().to_string(),
            &config.broker.group_id,
            &rows,
        ),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain => {
            for row in &rows {
                println!("{}\t{}\t{}", row.topic, row.records, row.lag);
            }
        }
    }

    Ok(())
}
