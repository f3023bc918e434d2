//! Step, banner and field lines shared by every command

use super::context::UiContext;
use console::{style, StyledObject};

/// How a line reads: success, warning, neutral or failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Ok,
    Warn,
    Info,
    Fail,
}

impl Tone {
    fn tag(self) -> StyledObject<&'static str> {
        match self {
            Tone::Ok => style("[OK]").green(),
            Tone::Warn => style("[WARN]").yellow(),
            Tone::Info => style("[INFO]").cyan(),
            Tone::Fail => style("[FAIL]").red(),
        }
    }

    fn paint(self, text: &str) -> StyledObject<&str> {
        match self {
            Tone::Ok => style(text).green().bold(),
            Tone::Warn => style(text).yellow().bold(),
            Tone::Info => style(text).cyan().bold(),
            Tone::Fail => style(text).red().bold(),
        }
    }
}

/// Command banner
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        cliclack::intro(style(title).cyan().bold()).ok();
    } else {
        println!("{}", style(title).cyan().bold());
        println!();
    }
}

/// Closing line of a long-running command
pub fn outro(ctx: &UiContext, tone: Tone, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(tone.paint(message)).ok();
    } else {
        println!();
        println!("{} {}", tone.tag(), message);
    }
}

pub fn step(ctx: &UiContext, tone: Tone, message: &str) {
    if !ctx.use_fancy_output() {
        println!("  {} {}", tone.tag(), message);
        return;
    }
    let shown = match tone {
        Tone::Ok => cliclack::log::success(message),
        Tone::Warn => cliclack::log::warning(message),
        Tone::Info => cliclack::log::info(message),
        Tone::Fail => cliclack::log::error(message),
    };
    shown.ok();
}

/// A step followed by a dimmed aside, e.g. a count breakdown or a next command
pub fn step_detail(ctx: &UiContext, tone: Tone, message: &str, detail: &str) {
    let line = match tone {
        Tone::Ok | Tone::Info => format!("{} ({})", message, style(detail).dim()),
        Tone::Warn => format!("{} - {}", message, style(detail).dim()),
        Tone::Fail => format!("{}: {}", message, style(detail).red()),
    };
    step(ctx, tone, &line);
}

/// Secondary guidance under a step
pub fn hint(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::remark(message).ok();
    } else {
        println!("  {}", style(message).dim());
    }
}

/// `name: value` line, e.g. the spool directory or consumer group
pub fn field(ctx: &UiContext, name: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(name).dim(), value);
    } else {
        println!("  {}: {}", name, value);
    }
}
