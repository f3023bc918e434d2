//! Whether output is read by a person or captured by a log

use console::user_attended;

const CI_VARS: [&str; 5] = ["CI", "GITHUB_ACTIONS", "GITLAB_CI", "BUILDKITE", "JENKINS_URL"];

/// Rendering mode for one command invocation
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    fancy: bool,
}

impl UiContext {
    /// cliclack log lines on an attended terminal outside CI, tagged lines otherwise
    pub fn detect() -> Self {
        Self {
            fancy: user_attended() && !running_in_ci(),
        }
    }

    /// Always tagged lines
    pub fn plain() -> Self {
        Self { fancy: false }
    }

    pub fn use_fancy_output(&self) -> bool {
        self.fancy
    }
}

fn running_in_ci() -> bool {
    CI_VARS.iter().any(|var| std::env::var_os(var).is_some())
}
