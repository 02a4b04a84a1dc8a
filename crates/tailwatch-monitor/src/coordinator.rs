use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use tailwatch_alerts::{AlertFactory, CompiledPattern, PatternMatcher};
use tailwatch_tail::{
    FileTailer, LineHandler, PendingFileRegistry, SharedLineHandler, TailCursor, TailerConfig,
};
use tailwatch_types::{MonitoringRule, RuleState, TailerStatus};

use crate::error::MonitorError;

/// Default delay between sweeps of the pending-file registry
pub const DEFAULT_PENDING_SWEEP: Duration = Duration::from_secs(5);

/// Coordinator settings
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub tailer: TailerConfig,

    /// How often pending files are checked for existence
    pub pending_sweep: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tailer: TailerConfig::default(),
            pending_sweep: DEFAULT_PENDING_SWEEP,
        }
    }
}

/// Outcome of applying a batch of rules
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub tailing: usize,
    pub pending: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Files whose rule could not be applied
    pub failed: Vec<PathBuf>,
}

impl ApplySummary {
    /// Rules active after the batch
    pub fn active(&self) -> usize {
        self.tailing + self.pending + self.unchanged
    }
}

/// A rule together with its tailer, if its file exists
struct ActiveRule {
    rule: MonitoringRule,
    tailer: Option<FileTailer>,
}

struct Shared {
    /// Active rules keyed by file path
    rules: Mutex<HashMap<PathBuf, ActiveRule>>,
    pending: PendingFileRegistry,
    matcher: PatternMatcher,
    alerts: AlertFactory,
    config: CoordinatorConfig,
    sweeper: parking_lot::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Owns every tailer and pending entry, keyed by file path.
///
/// A path is either tailing or pending, never both. All mutation goes
/// through the rule map lock, which is always taken before the pending
/// registry's.
#[derive(Clone)]
pub struct MonitorCoordinator {
    shared: Arc<Shared>,
}

impl MonitorCoordinator {
    pub fn new(config: CoordinatorConfig, matcher: PatternMatcher, alerts: AlertFactory) -> Self {
        Self {
            shared: Arc::new(Shared {
                rules: Mutex::new(HashMap::new()),
                pending: PendingFileRegistry::new(),
                matcher,
                alerts,
                config,
                sweeper: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Activate `rule`, replacing any rule already registered for its file.
    ///
    /// A previous tailer for the path is stopped before the new one starts.
    /// If the file does not exist the rule is parked as pending. A pattern
    /// that does not compile, or a path that exists but cannot be tailed,
    /// leaves the current rule for the path untouched.
    pub async fn apply_rule(&self, rule: MonitoringRule) -> Result<RuleState, MonitorError> {
        let path = rule.file_path.clone();
        match TailCursor::at_end(&path) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let pattern = self.shared.matcher.compile(&rule.pattern)?;
        let handler: SharedLineHandler = Arc::new(RuleHandler {
            source: path.display().to_string(),
            rule: rule.clone(),
            pattern,
            alerts: self.shared.alerts.clone(),
        });

        let mut rules = self.shared.rules.lock().await;

        if let Some(mut previous) = rules.remove(&path) {
            if let Some(tailer) = previous.tailer.as_mut() {
                tailer.stop().await;
            }
        }
        self.shared.pending.remove(&path);

        let config = &self.shared.config.tailer;
        let state = match FileTailer::start(&path, config, Arc::clone(&handler)) {
            Ok(tailer) => {
                rules.insert(
                    path.clone(),
                    ActiveRule {
                        rule,
                        tailer: Some(tailer),
                    },
                );
                info!(path = %path.display(), "Added monitoring rule");
                Ok(RuleState::Tailing)
            }
            Err(e) if e.is_not_found() => {
                self.shared.pending.add(&path, handler);
                rules.insert(path.clone(), ActiveRule { rule, tailer: None });
                info!(
                    path = %path.display(),
                    "Added monitoring rule (file does not exist yet, will monitor when created)"
                );
                Ok(RuleState::Pending)
            }
            // The file changed under us after the check above; the old rule is gone
            Err(e) => Err(e.into()),
        };

        self.prune_patterns(&rules);
        state
    }

    /// Apply rules one by one. A failing rule is logged and skipped; the rest
    /// are still applied.
    pub async fn apply_rules<I>(&self, rules: I) -> ApplySummary
    where
        I: IntoIterator<Item = MonitoringRule>,
    {
        let mut summary = ApplySummary::default();

        for rule in rules {
            let path = rule.file_path.clone();
            match self.apply_rule(rule).await {
                Ok(RuleState::Tailing) => summary.tailing += 1,
                Ok(RuleState::Pending) => summary.pending += 1,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Error adding monitoring rule");
                    summary.failed.push(path);
                }
            }
        }

        summary
    }

    /// Stop tailing `path` and forget its rule. Returns whether anything was
    /// registered for it.
    pub async fn remove_rule(&self, path: &Path) -> bool {
        let mut rules = self.shared.rules.lock().await;
        let was_pending = self.shared.pending.remove(path);

        let Some(mut active) = rules.remove(path) else {
            return was_pending;
        };
        if let Some(tailer) = active.tailer.as_mut() {
            tailer.stop().await;
        }
        self.prune_patterns(&rules);
        info!(path = %path.display(), "Removed monitoring rule");
        true
    }

    /// Evict compiled patterns no active rule uses anymore
    fn prune_patterns(&self, rules: &HashMap<PathBuf, ActiveRule>) {
        self.shared
            .matcher
            .retain(|pattern| rules.values().any(|a| a.rule.pattern == pattern));
    }

    /// Start tailing every pending file that now exists, with the handler it
    /// was registered with. Returns the number promoted.
    pub async fn promote_ready_entries(&self) -> usize {
        let mut rules = self.shared.rules.lock().await;
        let config = &self.shared.config.tailer;

        self.shared.pending.promote_ready_entries(|path, handler| {
            let Some(active) = rules.get_mut(path) else {
                debug!(path = %path.display(), "Dropping pending entry without a rule");
                return Ok(());
            };
            active.tailer = Some(FileTailer::start(path, config, handler)?);
            Ok(())
        })
    }

    /// Run [`promote_ready_entries`](Self::promote_ready_entries) on the
    /// configured schedule until [`shutdown`](Self::shutdown). Calling it
    /// again while a sweep is running does nothing.
    pub fn spawn_pending_sweep(&self) {
        let mut sweeper = self.shared.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let period = self.shared.config.pending_sweep;
        let cancel = CancellationToken::new();
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    let promoted = MonitorCoordinator { shared }.promote_ready_entries().await;
                    if promoted > 0 {
                        debug!(promoted, "Promoted pending files");
                    }
                }
            })
        };

        *sweeper = Some((cancel, task));
        info!(period_ms = period.as_millis() as u64, "Started pending file checker");
    }

    /// Stop the pending sweep and every tailer, and clear all rules
    pub async fn shutdown(&self) {
        info!("Stopping all log file monitors...");

        let sweeper = self.shared.sweeper.lock().take();
        if let Some((cancel, task)) = sweeper {
            cancel.cancel();
            let _ = task.await;
        }

        let mut rules = self.shared.rules.lock().await;
        let mut tailers: Vec<FileTailer> = rules.drain().filter_map(|(_, a)| a.tailer).collect();
        futures::future::join_all(tailers.iter_mut().map(FileTailer::stop)).await;
        self.shared.pending.clear();
        self.prune_patterns(&rules);
    }

    /// Snapshot of the active rules, sorted by file path
    pub async fn rules(&self) -> Vec<MonitoringRule> {
        let rules = self.shared.rules.lock().await;
        let mut snapshot: Vec<MonitoringRule> = rules.values().map(|a| a.rule.clone()).collect();
        snapshot.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        snapshot
    }

    pub async fn rule(&self, path: &Path) -> Option<MonitoringRule> {
        self.shared.rules.lock().await.get(path).map(|a| a.rule.clone())
    }

    pub async fn rule_state(&self, path: &Path) -> Option<RuleState> {
        self.shared.rules.lock().await.get(path).map(|a| match a.tailer {
            Some(_) => RuleState::Tailing,
            None => RuleState::Pending,
        })
    }

    pub async fn tailer_status(&self, path: &Path) -> Option<TailerStatus> {
        self.shared
            .rules
            .lock()
            .await
            .get(path)
            .and_then(|a| a.tailer.as_ref())
            .map(FileTailer::status)
    }

    pub async fn tailing_count(&self) -> usize {
        self.shared
            .rules
            .lock()
            .await
            .values()
            .filter(|a| a.tailer.is_some())
            .count()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.shared.pending.is_pending(path)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.count()
    }
}

/// Matches each tailed line against one rule and raises an alert on a hit
struct RuleHandler {
    source: String,
    rule: MonitoringRule,
    pattern: CompiledPattern,
    alerts: AlertFactory,
}

impl LineHandler for RuleHandler {
    fn handle_line(&self, line: &str) -> anyhow::Result<()> {
        debug!(path = %self.source, line, "Received line");
        if !self.pattern.is_match(line) {
            return Ok(());
        }

        info!(pattern = %self.rule.pattern, path = %self.source, line, "Pattern matched");
        self.alerts.raise(
            &self.source,
            &self.rule.severity,
            &self.rule.pattern,
            line,
            &self.rule.destination,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tailwatch_alerts::{MemorySink, SinkRegistry};

    fn coordinator(sweep: Duration) -> (MonitorCoordinator, MemorySink) {
        coordinator_with(sweep, PatternMatcher::new())
    }

    fn coordinator_with(
        sweep: Duration,
        matcher: PatternMatcher,
    ) -> (MonitorCoordinator, MemorySink) {
        let sink = MemorySink::new();
        let config = CoordinatorConfig {
            tailer: TailerConfig {
                poll_interval: Duration::from_millis(10),
            },
            pending_sweep: sweep,
        };
        let alerts = AlertFactory::new(SinkRegistry::new(Arc::new(sink.clone())));
        (
            MonitorCoordinator::new(config, matcher, alerts),
            sink,
        )
    }

    fn append(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    async fn wait_for_alerts(sink: &MemorySink, count: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.len() < count && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Long enough for several polls of a 10ms tailer
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn test_pending_file_is_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let (coordinator, sink) = coordinator(DEFAULT_PENDING_SWEEP);

        let state = coordinator
            .apply_rule(MonitoringRule::new(&path, "level=ERROR"))
            .await
            .unwrap();
        assert_eq!(state, RuleState::Pending);
        assert!(coordinator.is_pending(&path));
        assert_eq!(coordinator.tailing_count().await, 0);

        // Written before promotion: must never be delivered
        append(&path, "level=ERROR written before promotion\n");
        assert_eq!(coordinator.promote_ready_entries().await, 1);
        assert!(!coordinator.is_pending(&path));
        assert_eq!(coordinator.rule_state(&path).await, Some(RuleState::Tailing));

        append(&path, "level=ERROR boom\n");
        wait_for_alerts(&sink, 1).await;
        settle().await;
        coordinator.shutdown().await;

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].matched_pattern, "level=ERROR");
        assert_eq!(alerts[0].log_line, "level=ERROR boom");
        assert_eq!(alerts[0].source_file, path.display().to_string());
    }

    #[tokio::test]
    async fn test_pending_sweep_runs_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.log");
        let (coordinator, _) = coordinator(Duration::from_millis(20));
        coordinator.spawn_pending_sweep();

        coordinator
            .apply_rule(MonitoringRule::new(&path, "x"))
            .await
            .unwrap();
        append(&path, "");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while coordinator.is_pending(&path) && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(coordinator.rule_state(&path).await, Some(RuleState::Tailing));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_case_insensitive_and_non_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("json.log");
        append(&path, "");
        let (coordinator, sink) = coordinator(DEFAULT_PENDING_SWEEP);

        coordinator
            .apply_rule(MonitoringRule::new(&path, r#""level":\s*"WARN""#).with_severity("MEDIUM"))
            .await
            .unwrap();

        append(&path, "no match here\n{\"level\":\"wARN\"}\n");
        wait_for_alerts(&sink, 1).await;
        settle().await;
        coordinator.shutdown().await;

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].log_line, r#"{"level":"wARN"}"#);
        assert_eq!(alerts[0].severity, "MEDIUM");
    }

    #[tokio::test]
    async fn test_reapply_replaces_rule_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");
        let (coordinator, sink) = coordinator(DEFAULT_PENDING_SWEEP);

        coordinator
            .apply_rule(MonitoringRule::new(&path, "first"))
            .await
            .unwrap();
        coordinator
            .apply_rule(MonitoringRule::new(&path, "first"))
            .await
            .unwrap();
        assert_eq!(coordinator.tailing_count().await, 1);

        append(&path, "first hit\n");
        wait_for_alerts(&sink, 1).await;
        settle().await;
        assert_eq!(sink.len(), 1);

        coordinator
            .apply_rule(MonitoringRule::new(&path, "second"))
            .await
            .unwrap();
        append(&path, "first again\nsecond hit\n");
        wait_for_alerts(&sink, 2).await;
        settle().await;
        coordinator.shutdown().await;

        let lines: Vec<String> = sink.alerts().into_iter().map(|a| a.log_line).collect();
        assert_eq!(lines, vec!["first hit", "second hit"]);
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.log");
        let bad = dir.path().join("bad.log");
        append(&good, "");
        append(&bad, "");
        let (coordinator, _) = coordinator(DEFAULT_PENDING_SWEEP);

        let summary = coordinator
            .apply_rules(vec![
                MonitoringRule::new(&bad, "level=(ERROR"),
                MonitoringRule::new(&good, "level=ERROR"),
            ])
            .await;

        assert_eq!(summary.tailing, 1);
        assert_eq!(summary.failed, vec![bad.clone()]);
        assert_eq!(coordinator.rule(&bad).await, None);
        assert_eq!(coordinator.rule_state(&good).await, Some(RuleState::Tailing));

        // A bad replacement keeps the working rule
        let err = coordinator
            .apply_rule(MonitoringRule::new(&good, "("))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Pattern(_)));
        assert_eq!(coordinator.rule(&good).await.unwrap().pattern, "level=ERROR");
        coordinator.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_untailable_path_keeps_running_rule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");
        let (coordinator, _) = coordinator(DEFAULT_PENDING_SWEEP);

        coordinator
            .apply_rule(MonitoringRule::new(&path, "first"))
            .await
            .unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        let err = coordinator
            .apply_rule(MonitoringRule::new(&path, "second"))
            .await
            .unwrap_err();

        assert!(matches!(err, MonitorError::Tail(_)));
        assert_eq!(coordinator.rule(&path).await.unwrap().pattern, "first");
        assert_eq!(coordinator.rule_state(&path).await, Some(RuleState::Tailing));
        assert!(!coordinator.is_pending(&path));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unused_patterns_are_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        append(&a, "");
        let matcher = PatternMatcher::new();
        let (coordinator, _) = coordinator_with(DEFAULT_PENDING_SWEEP, matcher.clone());

        coordinator
            .apply_rule(MonitoringRule::new(&a, "first"))
            .await
            .unwrap();
        coordinator
            .apply_rule(MonitoringRule::new(&a, "second"))
            .await
            .unwrap();
        assert_eq!(matcher.cached(), 1);

        coordinator
            .apply_rule(MonitoringRule::new(&b, "second"))
            .await
            .unwrap();
        assert!(coordinator.remove_rule(&a).await);
        assert_eq!(matcher.cached(), 1);

        assert!(coordinator.remove_rule(&b).await);
        assert_eq!(matcher.cached(), 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_rule() {
        let dir = tempfile::tempdir().unwrap();
        let tailed = dir.path().join("tailed.log");
        let pending = dir.path().join("pending.log");
        append(&tailed, "");
        let (coordinator, sink) = coordinator(DEFAULT_PENDING_SWEEP);

        coordinator
            .apply_rules(vec![
                MonitoringRule::new(&tailed, "boom"),
                MonitoringRule::new(&pending, "boom"),
            ])
            .await;
        assert_eq!(coordinator.pending_count(), 1);

        assert!(coordinator.remove_rule(&tailed).await);
        assert!(coordinator.remove_rule(&pending).await);
        assert!(!coordinator.remove_rule(&pending).await);
        assert_eq!(coordinator.pending_count(), 0);
        assert!(coordinator.rules().await.is_empty());

        append(&tailed, "boom\n");
        append(&pending, "boom\n");
        assert_eq!(coordinator.promote_ready_entries().await, 0);
        settle().await;
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_rules_snapshot_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        append(&a, "");
        let (coordinator, _) = coordinator(DEFAULT_PENDING_SWEEP);

        coordinator
            .apply_rules(vec![MonitoringRule::new(&b, "y"), MonitoringRule::new(&a, "x")])
            .await;

        let paths: Vec<PathBuf> = coordinator
            .rules()
            .await
            .into_iter()
            .map(|r| r.file_path)
            .collect();
        assert_eq!(paths, vec![a.clone(), b.clone()]);
        assert_eq!(coordinator.rule_state(&b).await, Some(RuleState::Pending));
        assert_eq!(coordinator.tailer_status(&b).await, None);

        settle().await;
        assert_eq!(coordinator.tailer_status(&a).await, Some(TailerStatus::Tailing));

        coordinator.shutdown().await;
        assert!(coordinator.rules().await.is_empty());
        assert_eq!(coordinator.pending_count(), 0);
    }
}
