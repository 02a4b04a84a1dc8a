use std::sync::Arc;

/// Receives every complete line a tailer reads, in file order.
///
/// An error returned here is logged by the tailer and the next line is
/// delivered as usual.
pub trait LineHandler: Send + Sync {
    fn handle_line(&self, line: &str) -> anyhow::Result<()>;
}

impl<F> LineHandler for F
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync,
{
    fn handle_line(&self, line: &str) -> anyhow::Result<()> {
        self(line)
    }
}

/// Handler shared between a pending entry and the tailer it is promoted to
pub type SharedLineHandler = Arc<dyn LineHandler>;
