use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use tailwatch_types::{Alert, DEFAULT_DESTINATION};

use crate::error::SinkError;

/// Receives serialized alerts.
///
/// Delivery is a single best-effort call; callers log failures and move on.
pub trait AlertSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn send(&self, payload: &str, destination: &str) -> Result<(), SinkError>;
}

/// Prints alerts to stdout
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleSink;

impl AlertSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn send(&self, payload: &str, destination: &str) -> Result<(), SinkError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "ALERT: {payload}")?;
        stdout.flush()?;
        info!(destination, alert = payload, "Alert generated");
        Ok(())
    }
}

/// Keeps alerts in memory, for embedding and tests
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    payloads: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw payloads received so far
    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().clone()
    }

    /// Payloads that parse back into alerts
    pub fn alerts(&self) -> Vec<Alert> {
        self.payloads
            .lock()
            .iter()
            .filter_map(|p| serde_json::from_str(p).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.payloads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.lock().is_empty()
    }

    pub fn clear(&self) {
        self.payloads.lock().clear();
    }
}

impl AlertSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn send(&self, payload: &str, _destination: &str) -> Result<(), SinkError> {
        self.payloads.lock().push(payload.to_string());
        Ok(())
    }
}

/// Routes a rule's `destination` to a sink.
///
/// Destinations with no registered sink go to the default sink.
#[derive(Clone)]
pub struct SinkRegistry {
    default: Arc<dyn AlertSink>,
    routes: Arc<RwLock<HashMap<String, Arc<dyn AlertSink>>>>,
}

impl SinkRegistry {
    pub fn new(default: Arc<dyn AlertSink>) -> Self {
        Self {
            default,
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Route `destination` to `sink`, replacing any earlier route
    pub fn register(&self, destination: impl Into<String>, sink: Arc<dyn AlertSink>) {
        self.routes.write().insert(destination.into(), sink);
    }

    pub fn resolve(&self, destination: &str) -> Arc<dyn AlertSink> {
        self.routes
            .read()
            .get(destination)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    /// Registered destinations, sorted
    pub fn destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self.routes.read().keys().cloned().collect();
        destinations.sort();
        destinations
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        let console: Arc<dyn AlertSink> = Arc::new(ConsoleSink);
        let registry = Self::new(Arc::clone(&console));
        registry.register(DEFAULT_DESTINATION, console);
        registry
    }
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("default", &self.default.name())
            .field("destinations", &self.destinations())
            .finish()
    }
}
