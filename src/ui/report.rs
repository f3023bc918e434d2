//! Renderers for consumer progress, spool lag and cached grants

use super::context::UiContext;
use super::output::{field, intro, step, step_detail, Tone};
use crate::access::{AccessLevel, TeamRole};
use crate::consumer::ConsumerStatsSnapshot;
use chrono::{DateTime, Utc};
use console::{style, StyledObject};
use serde::Serialize;
use std::collections::BTreeMap;

/// One spool topic as shown by `aclsync status`
#[derive(Debug, Clone, Serialize)]
pub struct TopicRow {
    pub topic: String,
    pub records: u64,
    pub lag: u64,
    pub dead_letter: bool,
}

/// Applied/ignored/retried counts, plus a warning when anything was dead-lettered
pub fn consumer_report(ctx: &UiContext, stats: &ConsumerStatsSnapshot) {
    step_detail(
        ctx,
        Tone::Ok,
        &format!("{} events applied", stats.processed),
        &format!("{} ignored, {} retried", stats.ignored, stats.retried),
    );
    if stats.dead_lettered > 0 {
        step_detail(
            ctx,
            Tone::Warn,
            &format!("{} events dead-lettered", stats.dead_lettered),
            "Run: aclsync status",
        );
    }
}

pub fn topic_table(ctx: &UiContext, spool: &str, group: &str, rows: &[TopicRow]) {
    intro(ctx, "Spool status");
    field(ctx, "spool", spool);
    field(ctx, "group", group);
    println!();

    if rows.is_empty() {
        step(ctx, Tone::Info, "No topics yet");
        return;
    }

    println!(
        "{:<32} {:>10} {:>10}",
        style("TOPIC").bold(),
        style("RECORDS").bold(),
        style("LAG").bold()
    );
    println!("{}", "-".repeat(54));
    for row in rows {
        let topic = if row.dead_letter {
            style(row.topic.as_str()).red()
        } else {
            style(row.topic.as_str())
        };
        println!("{:<32} {:>10} {:>10}", topic, row.records, lag_cell(row.lag));
    }

    println!();
    let dead: u64 = dead_lettered(rows);
    if dead > 0 {
        step(ctx, Tone::Warn, &format!("{} dead-lettered events", dead));
    } else {
        step(ctx, Tone::Ok, "No dead-lettered events");
    }
}

/// Records sitting on dead-letter topics
pub fn dead_lettered(rows: &[TopicRow]) -> u64 {
    rows.iter().filter(|r| r.dead_letter).map(|r| r.records).sum()
}

fn lag_cell(lag: u64) -> StyledObject<u64> {
    if lag == 0 {
        style(lag).green()
    } else {
        style(lag).yellow()
    }
}

/// User to level (or role) table for one cached projection
pub fn grant_table(
    ctx: &UiContext,
    title: &str,
    column: &str,
    taken_at: DateTime<Utc>,
    grants: &BTreeMap<String, String>,
) {
    intro(ctx, title);
    field(ctx, "snapshot", &taken_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    println!();

    if grants.is_empty() {
        step(ctx, Tone::Info, "Nothing cached");
        return;
    }

    println!("{:<38} {:<10}", style("USER").bold(), style(column).bold());
    println!("{}", "-".repeat(49));
    for (user, value) in grants {
        println!("{:<38} {:<10}", user, grant_cell(value));
    }
    println!();
    println!(
        "{} entr{}",
        grants.len(),
        if grants.len() == 1 { "y" } else { "ies" }
    );
}

/// Priority of a cached level or role; unknown text ranks like NONE
fn grant_rank(value: &str) -> u8 {
    AccessLevel::parse_lenient(value)
        .priority()
        .max(TeamRole::parse_lenient(value).priority())
}

/// Stronger grants read brighter
pub fn grant_cell(value: &str) -> StyledObject<&str> {
    match grant_rank(value) {
        3 => style(value).green().bold(),
        2 => style(value).green(),
        1 => style(value).cyan(),
        _ => style(value).dim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(topic: &str, records: u64, dead_letter: bool) -> TopicRow {
        TopicRow {
            topic: topic.to_string(),
            records,
            lag: 0,
            dead_letter,
        }
    }

    #[test]
    fn dead_lettered_counts_only_dlq_topics() {
        let rows = vec![
            row("asset.changes", 7, false),
            row("asset.changes.dlq", 2, true),
            row("team.activity.dlq", 1, true),
        ];
        assert_eq!(dead_lettered(&rows), 3);
        topic_table(&UiContext::plain(), "/tmp/spool", "g", &rows);
    }

    #[test]
    fn grant_cells_rank_levels_and_roles() {
        assert_eq!(grant_rank("OWNER"), 3);
        assert_eq!(grant_rank("MANAGER"), grant_rank("WRITE"));
        assert_eq!(grant_rank("member"), grant_rank("READ"));
        assert_eq!(grant_rank("garbage"), 0);
        assert_eq!(
            grant_cell("OWNER").force_styling(true).to_string(),
            style("OWNER").green().bold().force_styling(true).to_string()
        );
        assert_eq!(
            grant_cell("garbage").force_styling(true).to_string(),
            style("garbage").dim().force_styling(true).to_string()
        );
    }
}
