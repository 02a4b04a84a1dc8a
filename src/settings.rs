//! Runtime settings
//!
//! Loaded from an optional TOML file. Every key has a default, so an absent
//! file or an empty one gives the stock behaviour.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use tailwatch_monitor::{CoordinatorConfig, ReloadConfig};
use tailwatch_tail::TailerConfig;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Delay between polls of each tailed file
    pub poll_interval_ms: u64,

    /// Delay between checks for pending files
    pub pending_sweep_secs: u64,

    /// Quiet period after a rule file change before reloading
    pub reload_debounce_ms: u64,

    /// Longest single wait on the rule file watcher
    pub watch_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            pending_sweep_secs: 5,
            reload_debounce_ms: 500,
            watch_timeout_ms: 1000,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid settings file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("pending_sweep_secs", self.pending_sweep_secs),
            ("watch_timeout_ms", self.watch_timeout_ms),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            tailer: TailerConfig {
                poll_interval: Duration::from_millis(self.poll_interval_ms),
            },
            pending_sweep: Duration::from_secs(self.pending_sweep_secs),
        }
    }

    pub fn reload_config(&self) -> ReloadConfig {
        ReloadConfig {
            debounce: Duration::from_millis(self.reload_debounce_ms),
            watch_timeout: Duration::from_millis(self.watch_timeout_ms),
        }
    }
}
