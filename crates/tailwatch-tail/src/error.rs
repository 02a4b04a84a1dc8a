use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while tailing a file
#[derive(Debug, Error)]
pub enum TailError {
    /// The file did not exist when tailing was requested
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Reading or inspecting the file failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TailError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_))
    }
}

/// A specialized Result type for tailing operations
pub type Result<T> = std::result::Result<T, TailError>;
