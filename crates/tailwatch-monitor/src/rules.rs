use std::path::{Path, PathBuf};

use tracing::warn;

use tailwatch_types::MonitoringRule;

use crate::error::ConfigError;

/// Rule file used when the requested one does not exist
pub const DEFAULT_RULES_PATH: &str = "config/monitoring-rules.json";

/// Pick the rule file to load: `requested` if it exists, otherwise the
/// bundled default.
pub fn resolve_rules_path(requested: Option<&Path>) -> PathBuf {
    match requested {
        Some(path) if path.exists() => path.to_path_buf(),
        Some(path) => {
            warn!(
                requested = %path.display(),
                fallback = DEFAULT_RULES_PATH,
                "Rule file not found, using default location"
            );
            PathBuf::from(DEFAULT_RULES_PATH)
        }
        None => PathBuf::from(DEFAULT_RULES_PATH),
    }
}

/// Parse a JSON array of rules. `path` is only used for error reporting.
pub fn parse_rules(path: &Path, content: &str) -> Result<Vec<MonitoringRule>, ConfigError> {
    let rules: Vec<MonitoringRule> =
        serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if let Some(index) = rules
        .iter()
        .position(|r| r.file_path.as_os_str().is_empty())
    {
        return Err(ConfigError::Invalid {
            path: path.to_path_buf(),
            message: format!("rule {index} has an empty logFile"),
        });
    }

    Ok(rules)
}

/// Read and parse the rule file at `path`
pub async fn load_rules(path: &Path) -> Result<Vec<MonitoringRule>, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_rules(path, &content)
}
