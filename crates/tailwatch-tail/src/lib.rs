//! File tailing for tailwatch
//!
//! This crate streams newly appended lines of individual files, survives
//! rotation, and keeps track of files that do not exist yet.

mod cursor;
mod error;
mod handler;
mod pending;
mod tailer;

pub use cursor::{MAX_PARTIAL_LINE, MAX_READ_PER_POLL, Poll, TailCursor};
pub use error::{Result, TailError};
pub use handler::{LineHandler, SharedLineHandler};
pub use pending::PendingFileRegistry;
pub use tailer::{DEFAULT_POLL_INTERVAL, FileTailer, TailerConfig};

// Re-export types used in our public API
pub use tailwatch_types::TailerStatus;
