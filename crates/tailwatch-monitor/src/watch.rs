use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use crate::error::WatchError;

/// A change observed in the watched directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file was created, written, or renamed into place
    Modified(PathBuf),
    /// A file was deleted
    Removed(PathBuf),
    /// Nothing happened within the wait timeout
    Timeout,
    /// The source can no longer deliver events
    Closed,
}

impl WatchEvent {
    /// Path the event refers to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Modified(path) | Self::Removed(path) => Some(path),
            Self::Timeout | Self::Closed => None,
        }
    }
}

/// Source of file system change events.
///
/// Waits are always bounded so callers can notice shutdown promptly.
pub trait ConfigEventSource: Send {
    /// Wait up to `timeout` for the next event
    fn next_event(&mut self, timeout: Duration) -> impl Future<Output = WatchEvent> + Send;
}

/// Directory watcher backed by the platform's native notification API
pub struct NotifyEventSource {
    /// Dropping the watcher releases the OS watch handle
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<notify::Result<Event>>,
    queued: VecDeque<WatchEvent>,
}

impl NotifyEventSource {
    /// Watch the entries directly inside `dir`
    pub fn watch_dir(dir: &Path) -> Result<Self, WatchError> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if let Err(e) = sender.send(res) {
                    warn!("Failed to send file system event: receiver dropped ({})", e);
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _watcher: watcher,
            receiver,
            queued: VecDeque::new(),
        })
    }

    fn translate(&mut self, event: Event) {
        let make: fn(PathBuf) -> WatchEvent = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => WatchEvent::Modified,
            EventKind::Remove(_) => WatchEvent::Removed,
            _ => return,
        };
        self.queued.extend(event.paths.into_iter().map(make));
    }
}

impl ConfigEventSource for NotifyEventSource {
    async fn next_event(&mut self, timeout: Duration) -> WatchEvent {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(event) = self.queued.pop_front() {
                return event;
            }

            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Err(_) => return WatchEvent::Timeout,
                Ok(None) => return WatchEvent::Closed,
                Ok(Some(Ok(event))) => self.translate(event),
                Ok(Some(Err(e))) => warn!(error = %e, "Configuration watcher error"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};

    fn source() -> (NotifyEventSource, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (NotifyEventSource::watch_dir(dir.path()).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_translate_event_kinds() {
        let (mut source, _dir) = source();

        source.translate(
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(PathBuf::from("/etc/rules.json")),
        );
        source.translate(
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/etc/new.json")),
        );
        source.translate(
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/etc/old.json")),
        );
        source.translate(Event::new(EventKind::Access(notify::event::AccessKind::Any)));

        let timeout = Duration::from_millis(10);
        assert_eq!(
            source.next_event(timeout).await,
            WatchEvent::Modified(PathBuf::from("/etc/rules.json"))
        );
        assert_eq!(
            source.next_event(timeout).await,
            WatchEvent::Modified(PathBuf::from("/etc/new.json"))
        );
        assert_eq!(
            source.next_event(timeout).await,
            WatchEvent::Removed(PathBuf::from("/etc/old.json"))
        );
    }

    #[test]
    fn test_event_path() {
        let path = PathBuf::from("/etc/rules.json");
        assert_eq!(WatchEvent::Modified(path.clone()).path(), Some(path.as_path()));
        assert_eq!(WatchEvent::Removed(path.clone()).path(), Some(path.as_path()));
        assert_eq!(WatchEvent::Timeout.path(), None);
        assert_eq!(WatchEvent::Closed.path(), None);
    }

    #[tokio::test]
    async fn test_wait_is_bounded() {
        let (mut source, _dir) = source();
        let started = std::time::Instant::now();
        // Other events may arrive on some platforms; only the bound matters
        let _ = source.next_event(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_sees_file_writes() {
        let (mut source, dir) = source();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "[]").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut seen = false;
        while !seen && std::time::Instant::now() < deadline {
            if let WatchEvent::Modified(p) = source.next_event(Duration::from_millis(100)).await {
                seen = p.file_name() == path.file_name();
            }
        }
        assert!(seen);
    }
}
