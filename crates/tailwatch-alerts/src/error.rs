use thiserror::Error;

/// A rule pattern that is not a valid regular expression
#[derive(Debug, Error)]
#[error("invalid pattern '{pattern}': {source}")]
pub struct PatternError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Failure to hand an alert to its destination
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink '{sink}' rejected alert: {message}")]
    Rejected { sink: String, message: String },
}
