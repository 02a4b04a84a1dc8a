use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tailwatch_types::TailerStatus;

use crate::cursor::TailCursor;
use crate::error::Result;
use crate::handler::{LineHandler, SharedLineHandler};

/// Default delay between polls of a tailed file
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tailer settings
#[derive(Clone, Debug)]
pub struct TailerConfig {
    /// Fixed delay between polls
    pub poll_interval: Duration,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Streams lines appended to one file to a handler.
///
/// Reading starts at the end of the file as it was when [`FileTailer::start`]
/// was called, so content written before that is never delivered.
pub struct FileTailer {
    /// File being tailed
    path: PathBuf,

    /// Cancellation token for the polling task
    cancel: CancellationToken,

    /// Polling task handle, taken on stop
    task: Option<JoinHandle<()>>,

    /// Status shared with the polling task
    status: Arc<RwLock<TailerStatus>>,
}

impl FileTailer {
    /// Start tailing `path` from its current end.
    ///
    /// Fails with [`TailError::FileNotFound`](crate::TailError::FileNotFound)
    /// if the file does not exist. Must be called within a tokio runtime.
    pub fn start(
        path: impl Into<PathBuf>,
        config: &TailerConfig,
        handler: SharedLineHandler,
    ) -> Result<Self> {
        let cursor = TailCursor::at_end(path)?;
        let path = cursor.path().to_path_buf();
        let offset = cursor.offset();

        let status = Arc::new(RwLock::new(TailerStatus::Starting));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(poll_loop(
            cursor,
            handler,
            config.poll_interval,
            cancel.clone(),
            Arc::clone(&status),
        ));

        info!(path = %path.display(), offset, "Started tailing");

        Ok(Self {
            path,
            cancel,
            task: Some(task),
            status,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> TailerStatus {
        *self.status.read()
    }

    /// Stop tailing and wait for the polling task to finish.
    ///
    /// No line is delivered after this returns. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        let Some(task) = self.task.take() else {
            return;
        };

        if let Err(e) = task.await {
            if e.is_panic() {
                error!(path = %self.path.display(), "Tailer task panicked");
            }
        }
        *self.status.write() = TailerStatus::Stopped;
        info!(path = %self.path.display(), "Stopped tailing");
    }
}

impl Drop for FileTailer {
    fn drop(&mut self) {
        // Without stop() the task still exits on its next wakeup
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for FileTailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTailer")
            .field("path", &self.path)
            .field("status", &self.status())
            .finish()
    }
}

async fn poll_loop(
    mut cursor: TailCursor,
    handler: SharedLineHandler,
    poll_interval: Duration,
    cancel: CancellationToken,
    status: Arc<RwLock<TailerStatus>>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    *status.write() = TailerStatus::Tailing;

    let mut backlog = false;

    loop {
        if backlog {
            // Keep reading without waiting for the next tick
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                break;
            }
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        let poll = match cursor.poll().await {
            Ok(poll) => poll,
            Err(e) => {
                warn!(path = %cursor.path().display(), error = %e, "Read failed, retrying on next poll");
                backlog = false;
                continue;
            }
        };
        backlog = poll.backlog;

        if poll.vanished {
            warn!(path = %cursor.path().display(), "File not found, waiting for it to reappear");
        }
        if poll.rotated {
            info!(path = %cursor.path().display(), "File rotated, reading from start");
            *status.write() = TailerStatus::Rotated;
        } else if !poll.vanished {
            *status.write() = TailerStatus::Tailing;
        }

        for line in &poll.lines {
            if cancel.is_cancelled() {
                break;
            }
            deliver(handler.as_ref(), cursor.path(), line);
        }
    }

    *status.write() = TailerStatus::Stopped;
}

/// Hand one line to the handler; a failing or panicking handler costs only that line
fn deliver(handler: &dyn LineHandler, path: &Path, line: &str) {
    match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle_line(line))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(path = %path.display(), line, error = %e, "Error processing line");
        }
        Err(_) => {
            error!(path = %path.display(), line, "Line handler panicked");
        }
    }
}
