use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::error::{Result, TailError};

/// Most bytes read from a file in a single poll
pub const MAX_READ_PER_POLL: u64 = 1024 * 1024;

/// Longest unterminated line kept buffered; anything longer is flushed as
/// a line of its own
pub const MAX_PARTIAL_LINE: usize = 64 * 1024;

/// Identity of the file currently behind a path.
///
/// A change means the path now points at a different file (rotation by
/// rename-and-recreate).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileSignature {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileSignature {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        Self {
            created: meta.created().ok(),
        }
    }
}

/// Result of a single poll
#[derive(Debug, Default)]
pub struct Poll {
    /// Complete lines read since the previous poll, in file order
    pub lines: Vec<String>,

    /// The file was truncated or replaced; reading restarted at offset 0
    pub rotated: bool,

    /// The file disappeared since the previous poll
    pub vanished: bool,

    /// More bytes were waiting than one poll reads
    pub backlog: bool,
}

/// Read position within one file.
///
/// Owns the offset, the rotation signature, and any trailing partial line.
/// Only complete lines are ever handed out.
#[derive(Debug)]
pub struct TailCursor {
    path: PathBuf,
    offset: u64,
    signature: FileSignature,
    partial: Vec<u8>,
    missing: bool,
    max_read: u64,
    max_partial: usize,
}

impl TailCursor {
    /// Position a cursor at the current end of `path`
    pub fn at_end(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = std::fs::metadata(&path).map_err(|e| TailError::io(&path, e))?;
        if !meta.is_file() {
            return Err(TailError::Io {
                source: std::io::Error::other("not a regular file"),
                path,
            });
        }

        Ok(Self {
            offset: meta.len(),
            signature: FileSignature::of(&meta),
            partial: Vec::new(),
            missing: false,
            max_read: MAX_READ_PER_POLL,
            max_partial: MAX_PARTIAL_LINE,
            path,
        })
    }

    /// Override the per-poll read size and the partial line cap
    pub fn with_limits(mut self, max_read: u64, max_partial: usize) -> Self {
        self.max_read = max_read.max(1);
        self.max_partial = max_partial.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte position of the next unread byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read whatever was appended since the last poll
    pub async fn poll(&mut self) -> Result<Poll> {
        let mut poll = Poll::default();

        // Metadata comes from the opened handle so size, identity and content
        // all describe the same file even if the path is swapped meanwhile.
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                poll.vanished = !self.missing;
                self.missing = true;
                return Ok(poll);
            }
            Err(e) => return Err(TailError::io(&self.path, e)),
        };
        let meta = file
            .metadata()
            .await
            .map_err(|e| TailError::io(&self.path, e))?;
        self.missing = false;

        let signature = FileSignature::of(&meta);
        if signature != self.signature || meta.len() < self.offset {
            if !self.partial.is_empty() {
                debug!(
                    path = %self.path.display(),
                    bytes = self.partial.len(),
                    "Dropping unterminated line from rotated file"
                );
            }
            self.signature = signature;
            self.offset = 0;
            self.partial.clear();
            poll.rotated = true;
        }

        if meta.len() > self.offset {
            file.seek(SeekFrom::Start(self.offset))
                .await
                .map_err(|e| TailError::io(&self.path, e))?;

            let available = meta.len() - self.offset;
            let want = available.min(self.max_read);
            poll.backlog = available > want;

            let mut buf = Vec::with_capacity(want as usize);
            let read = file
                .take(want)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| TailError::io(&self.path, e))?;

            self.offset += read as u64;
            self.partial.extend_from_slice(&buf);
            poll.lines = self.drain_lines();
        }

        Ok(poll)
    }

    /// Split off every complete line, keeping the unterminated tail buffered
    /// up to the partial line cap
    fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') {
            let rest = self.partial.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.partial, rest);

            lines.extend(complete[..last_newline].split(|b| *b == b'\n').map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            }));
        }

        while self.partial.len() > self.max_partial {
            warn!(
                path = %self.path.display(),
                bytes = self.max_partial,
                "Unterminated line too long, flushing it as a line"
            );
            let rest = self.partial.split_off(self.max_partial);
            let chunk = std::mem::replace(&mut self.partial, rest);
            lines.push(String::from_utf8_lossy(&chunk).into_owned());
        }

        lines
    }
}
