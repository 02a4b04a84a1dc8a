//! Monitoring orchestration for tailwatch
//!
//! This crate maps rules to tailers, wires tailed lines through pattern
//! matching into alerts, and keeps the active rule set in sync with the rule
//! file on disk.

mod coordinator;
mod error;
mod reload;
mod rules;
mod watch;

pub use coordinator::{ApplySummary, CoordinatorConfig, DEFAULT_PENDING_SWEEP, MonitorCoordinator};
pub use error::{ConfigError, MonitorError, WatchError};
pub use reload::{ConfigReloadManager, DEFAULT_DEBOUNCE, DEFAULT_WATCH_TIMEOUT, ReloadConfig, ReloadState};
pub use rules::{DEFAULT_RULES_PATH, load_rules, parse_rules, resolve_rules_path};
pub use watch::{ConfigEventSource, NotifyEventSource, WatchEvent};

// Re-export types used in our public API
pub use tailwatch_types::{MonitoringRule, RuleState, TailerStatus};
