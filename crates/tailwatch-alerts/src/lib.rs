//! Alerting for tailwatch
//!
//! This crate provides case-insensitive pattern matching, standardized alert
//! construction, and the sinks alerts are delivered to.

mod error;
mod factory;
mod matcher;
mod sink;

pub use error::{PatternError, SinkError};
pub use factory::{AlertFactory, SERIALIZATION_ERROR};
pub use matcher::{CompiledPattern, PatternMatcher};
pub use sink::{AlertSink, ConsoleSink, MemorySink, SinkRegistry};

// Re-export types used in our public API
pub use tailwatch_types::Alert;
