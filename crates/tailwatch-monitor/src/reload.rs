use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tailwatch_types::MonitoringRule;

use crate::coordinator::{ApplySummary, MonitorCoordinator};
use crate::error::{ConfigError, WatchError};
use crate::rules::load_rules;
use crate::watch::{ConfigEventSource, NotifyEventSource, WatchEvent};

/// Default quiet period between a change event and re-reading the file
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Default upper bound on a single wait for watch events
pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(1);

/// Reload settings
#[derive(Clone, Debug)]
pub struct ReloadConfig {
    /// Wait after a change so a concurrent writer can finish
    pub debounce: Duration,

    /// Longest single wait on the event source
    pub watch_timeout: Duration,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            watch_timeout: DEFAULT_WATCH_TIMEOUT,
        }
    }
}

/// Where the reload manager is in its watch cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReloadState {
    /// Created or loaded, not watching yet
    #[default]
    Loaded,
    Watching,
    ChangeDetected,
    Debounce,
    Reload,
    /// Watching has ended; rules stay active but hot reload is off
    Stopped,
}

struct Shared {
    config_path: PathBuf,
    coordinator: MonitorCoordinator,
    state: RwLock<ReloadState>,
    /// Rule set from the last successful load, keyed by file path.
    /// Held for the whole of a reload so reloads never interleave.
    applied: Mutex<HashMap<PathBuf, MonitoringRule>>,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ReloadState) {
        *self.state.write() = state;
    }

    fn is_config_file(&self, path: &Path) -> bool {
        path.file_name().is_some() && path.file_name() == self.config_path.file_name()
    }

    /// Re-read the rule file and reconcile the coordinator with it.
    ///
    /// On any read or parse failure nothing is touched. Otherwise rules
    /// missing from the file are removed, unchanged rules keep running, and
    /// new or changed rules are applied.
    async fn reload(&self) -> Result<ApplySummary, ConfigError> {
        let mut applied = self.applied.lock().await;

        let rules = match load_rules(&self.config_path).await {
            Ok(rules) => dedupe(rules),
            Err(e) => {
                warn!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load configuration, keeping current rules"
                );
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let mut summary = ApplySummary::default();

        let stale: Vec<PathBuf> = applied
            .keys()
            .filter(|path| !rules.iter().any(|r| &r.file_path == *path))
            .cloned()
            .collect();
        for path in stale {
            if self.coordinator.remove_rule(&path).await {
                summary.removed += 1;
            }
        }

        let mut changed = Vec::new();
        for rule in &rules {
            let running = self.coordinator.rule(&rule.file_path).await;
            if applied.get(&rule.file_path) == Some(rule) && running.as_ref() == Some(rule) {
                summary.unchanged += 1;
            } else {
                changed.push(rule.clone());
            }
        }

        let outcome = self.coordinator.apply_rules(changed).await;
        summary.tailing = outcome.tailing;
        summary.pending = outcome.pending;
        summary.failed = outcome.failed;

        *applied = rules
            .into_iter()
            .filter(|r| !summary.failed.contains(&r.file_path))
            .map(|r| (r.file_path.clone(), r))
            .collect();
        self.succeeded.fetch_add(1, Ordering::Relaxed);

        info!(
            path = %self.config_path.display(),
            active = summary.active(),
            removed = summary.removed,
            failed = summary.failed.len(),
            "Successfully loaded monitoring rules"
        );
        Ok(summary)
    }
}

/// Keep the last rule for each file, in order of last appearance
fn dedupe(rules: Vec<MonitoringRule>) -> Vec<MonitoringRule> {
    let mut deduped: Vec<MonitoringRule> = Vec::with_capacity(rules.len());
    for rule in rules {
        if let Some(index) = deduped.iter().position(|r| r.file_path == rule.file_path) {
            warn!(path = %rule.file_path.display(), "Duplicate rule for file, the later one wins");
            deduped.remove(index);
        }
        deduped.push(rule);
    }
    deduped
}

enum Debounced {
    Elapsed,
    SourceClosed,
    Cancelled,
}

/// Keeps the coordinator's rules in sync with a rule file on disk
pub struct ConfigReloadManager {
    shared: Arc<Shared>,
    settings: ReloadConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConfigReloadManager {
    pub fn new(
        config_path: impl Into<PathBuf>,
        coordinator: MonitorCoordinator,
        settings: ReloadConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config_path: config_path.into(),
                coordinator,
                state: RwLock::new(ReloadState::Loaded),
                applied: Mutex::new(HashMap::new()),
                succeeded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            settings,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.shared.config_path
    }

    pub fn state(&self) -> ReloadState {
        *self.shared.state.read()
    }

    /// Loads that were applied, including the initial one
    pub fn successful_reloads(&self) -> u64 {
        self.shared.succeeded.load(Ordering::Relaxed)
    }

    /// Loads rejected because the file was unreadable or malformed
    pub fn failed_reloads(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// Initial load of the rule file
    pub async fn load(&self) -> Result<ApplySummary, ConfigError> {
        info!(path = %self.shared.config_path.display(), "Loading monitoring rules");
        self.shared.reload().await
    }

    /// Reload immediately, without waiting for a file event
    pub async fn reload_now(&self) -> Result<ApplySummary, ConfigError> {
        self.shared.reload().await
    }

    /// Watch the rule file's directory with the native file watcher
    pub async fn watch(&mut self) -> Result<(), WatchError> {
        let dir = match self.shared.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let source = NotifyEventSource::watch_dir(&dir)?;
        info!(dir = %dir.display(), "Started watching configuration file for changes");
        self.watch_with(source).await;
        Ok(())
    }

    /// Drive reloads from `source`. A watch already running is stopped, and
    /// its event source released, before the new one starts.
    pub async fn watch_with<S>(&mut self, source: S)
    where
        S: ConfigEventSource + 'static,
    {
        if let Some(task) = self.task.take() {
            self.cancel.cancel();
            let _ = task.await;
            self.cancel = CancellationToken::new();
        }

        self.shared.set_state(ReloadState::Watching);
        self.task = Some(tokio::spawn(watch_loop(
            Arc::clone(&self.shared),
            source,
            self.settings.clone(),
            self.cancel.clone(),
        )));
    }

    /// Stop watching and release the watch handle. Active rules are not
    /// touched.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.shared.set_state(ReloadState::Stopped);
    }
}

impl Drop for ConfigReloadManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_loop<S>(
    shared: Arc<Shared>,
    mut source: S,
    settings: ReloadConfig,
    cancel: CancellationToken,
) where
    S: ConfigEventSource,
{
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = source.next_event(settings.watch_timeout) => event,
        };

        if event == WatchEvent::Closed {
            error!("Configuration watch closed, hot reload is disabled");
            break;
        }
        let Some(path) = event.path().filter(|path| shared.is_config_file(path)) else {
            continue;
        };

        shared.set_state(ReloadState::ChangeDetected);
        info!(path = %path.display(), "Configuration file changed, reloading...");

        shared.set_state(ReloadState::Debounce);
        let debounced = debounce(&mut source, &settings, &cancel).await;
        if matches!(debounced, Debounced::Cancelled) {
            break;
        }

        shared.set_state(ReloadState::Reload);
        // Failures are logged inside and leave the current rules active
        let _ = shared.reload().await;

        if matches!(debounced, Debounced::SourceClosed) {
            error!("Configuration watch closed, hot reload is disabled");
            break;
        }
        shared.set_state(ReloadState::Watching);
    }

    shared.set_state(ReloadState::Stopped);
}

/// Wait out the debounce window, swallowing the burst of events a single
/// save usually produces
async fn debounce<S>(
    source: &mut S,
    settings: &ReloadConfig,
    cancel: &CancellationToken,
) -> Debounced
where
    S: ConfigEventSource,
{
    let deadline = Instant::now() + settings.debounce;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Debounced::Elapsed;
        }

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Debounced::Cancelled,
            event = source.next_event(remaining) => event,
        };
        if event == WatchEvent::Closed {
            return Debounced::SourceClosed;
        }
    }
}
