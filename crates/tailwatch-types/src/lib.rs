//! Shared types for tailwatch
//!
//! This crate contains data structures used across multiple tailwatch crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Rule Types
// ============================================================================

/// Severity used when a rule does not name one
pub const DEFAULT_SEVERITY: &str = "INFO";

/// Destination used when a rule does not name one
pub const DEFAULT_DESTINATION: &str = "console";

/// A single monitoring rule: which file to tail and what to look for.
///
/// The file path is the rule's identity; at most one rule is active per file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringRule {
    /// File to tail
    #[serde(rename = "logFile")]
    pub file_path: PathBuf,

    /// Regular expression matched case-insensitively against each new line
    pub pattern: String,

    /// Severity copied onto every alert raised by this rule
    #[serde(default = "default_severity")]
    pub severity: String,

    /// Routing key for the sink that receives this rule's alerts
    #[serde(default = "default_destination")]
    pub destination: String,
}

fn default_severity() -> String {
    DEFAULT_SEVERITY.to_string()
}

fn default_destination() -> String {
    DEFAULT_DESTINATION.to_string()
}

impl MonitoringRule {
    pub fn new(file_path: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            pattern: pattern.into(),
            severity: default_severity(),
            destination: default_destination(),
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }
}

/// Where a rule currently lives inside the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleState {
    /// The file exists and a tailer is running for it
    Tailing,
    /// The file does not exist yet; waiting for it to appear
    Pending,
}

impl RuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tailing => "tailing",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tailer Types
// ============================================================================

/// Lifecycle of a single file tailer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TailerStatus {
    #[default]
    Starting,
    Tailing,
    /// Rotation detected; the file is being re-read from offset 0
    Rotated,
    Stopped,
}

impl TailerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Tailing => "tailing",
            Self::Rotated => "rotated",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the tailer can still deliver lines
    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for TailerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Alert Types
// ============================================================================

/// A standardized alert raised for one matching line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Instant the alert was built
    pub timestamp: DateTime<Utc>,

    pub severity: String,

    /// File the line was read from
    pub source_file: String,

    /// Pattern of the rule that matched
    pub matched_pattern: String,

    /// The matching line, without its line terminator
    pub log_line: String,

    /// Free-form extension data, empty unless a caller adds to it
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Alert {
    /// Attach a metadata entry, keeping insertion order
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
