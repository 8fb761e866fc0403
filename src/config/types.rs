//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::BridgeOptions;
use crate::process::ChildCommand;

/// Settings loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Trace sent and received messages and lifecycle events.
    pub logging: bool,
    /// Strip the padding space from each side of inbound messages.
    pub strip_padding: bool,
    /// Child process to bridge to, for `line-bridge run`.
    pub child: Option<ChildSettings>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            logging: true,
            strip_padding: false,
            child: None,
        }
    }
}

impl BridgeSettings {
    /// Bridge options described by these settings.
    #[must_use]
    pub fn options(&self) -> BridgeOptions {
        BridgeOptions {
            logging: self.logging,
            strip_padding: self.strip_padding,
        }
    }
}

/// Child process configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSettings {
    /// Program to run.
    pub program: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// How long to wait for the child to exit after closing its stdin.
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,
}

/// Default time to wait for a child to exit, in milliseconds.
pub const DEFAULT_TERMINATE_TIMEOUT_MS: u64 = 5000;

fn default_terminate_timeout_ms() -> u64 {
    DEFAULT_TERMINATE_TIMEOUT_MS
}

impl ChildSettings {
    /// Command described by these settings.
    #[must_use]
    pub fn command(&self) -> ChildCommand {
        let command = ChildCommand::new(&self.program).args(&self.args);
        match &self.working_dir {
            Some(dir) => command.working_dir(dir),
            None => command,
        }
    }

    /// Exit timeout as a `Duration`.
    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}
