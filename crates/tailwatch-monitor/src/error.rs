use std::path::PathBuf;
use thiserror::Error;

use tailwatch_alerts::PatternError;
use tailwatch_tail::TailError;

/// Errors from applying a single rule
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The rule's pattern does not compile; the rule is skipped
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// The rule's file could not be tailed
    #[error(transparent)]
    Tail(#[from] TailError),
}

/// Errors from reading the rule file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read rule file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed rule file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid rule file {}: {message}", .path.display())]
    Invalid { path: PathBuf, message: String },
}

/// Errors from the configuration file watcher
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("file system watcher error: {0}")]
    Notify(#[from] notify::Error),
}
