//! Terminal output for the CLI
//!
//! `cliclack` log lines on an attended terminal, `[OK]`/`[WARN]` tagged
//! lines in CI and when piped. `report` renders the consumer and spool
//! views on top of those lines.
//!
//! # Example
//!
//! ```rust,ignore
//! use aclsync::ui::{self, Tone, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "aclsync consume");
//! ui::field(&ctx, "group", "collab-consumer-group");
//! ui::step_detail(&ctx, Tone::Warn, "3 events dead-lettered", "Run: aclsync status");
//! ```

mod context;
mod output;
mod report;

pub use context::UiContext;
pub use output::{field, hint, intro, outro, step, step_detail, Tone};
pub use report::{consumer_report, dead_lettered, grant_cell, grant_table, topic_table, TopicRow};
