use chrono::Utc;
use serde::Serialize;
use serde_json::Map;
use tracing::error;

use tailwatch_types::Alert;

use crate::sink::SinkRegistry;

/// Message carried by the payload emitted when an alert cannot be serialized
pub const SERIALIZATION_ERROR: &str = "Failed to serialize alert";

/// Builds standardized alerts and hands them to the sink for their destination
#[derive(Clone, Debug, Default)]
pub struct AlertFactory {
    sinks: SinkRegistry,
}

impl AlertFactory {
    pub fn new(sinks: SinkRegistry) -> Self {
        Self { sinks }
    }

    /// Build an alert stamped with the current instant
    pub fn build(&self, source_file: &str, severity: &str, pattern: &str, line: &str) -> Alert {
        Alert {
            timestamp: Utc::now(),
            severity: severity.to_string(),
            source_file: source_file.to_string(),
            matched_pattern: pattern.to_string(),
            log_line: line.to_string(),
            metadata: Map::new(),
        }
    }

    /// Serialize to the JSON wire format. Never fails: on error a minimal
    /// `{"error": ...}` payload is returned instead.
    pub fn serialize(&self, alert: &Alert) -> String {
        to_wire(alert)
    }

    /// Deliver a serialized alert. Best effort: a sink failure is logged and
    /// reported as `false`, never retried.
    pub fn send(&self, payload: &str, destination: &str) -> bool {
        let sink = self.sinks.resolve(destination);
        match sink.send(payload, destination) {
            Ok(()) => true,
            Err(e) => {
                error!(destination, sink = sink.name(), error = %e, "Failed to deliver alert");
                false
            }
        }
    }

    /// Build, serialize and send in one step
    pub fn raise(
        &self,
        source_file: &str,
        severity: &str,
        pattern: &str,
        line: &str,
        destination: &str,
    ) -> bool {
        let alert = self.build(source_file, severity, pattern, line);
        let payload = self.serialize(&alert);
        self.send(&payload, destination)
    }
}

fn to_wire<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Error serializing alert");
            serde_json::json!({ "error": SERIALIZATION_ERROR }).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::sink::{AlertSink, MemorySink};
    use std::sync::Arc;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("boom"))
        }
    }

    struct FailingSink;

    impl AlertSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn send(&self, _: &str, _: &str) -> Result<(), SinkError> {
            Err(SinkError::Rejected {
                sink: "failing".to_string(),
                message: "unreachable".to_string(),
            })
        }
    }

    fn memory_factory() -> (AlertFactory, MemorySink) {
        let sink = MemorySink::new();
        (
            AlertFactory::new(SinkRegistry::new(Arc::new(sink.clone()))),
            sink,
        )
    }

    #[test]
    fn test_build() {
        let (factory, _) = memory_factory();
        let before = Utc::now();
        let alert = factory.build("a.log", "HIGH", "level=ERROR", "level=ERROR boom");

        assert!(alert.timestamp >= before);
        assert_eq!(alert.severity, "HIGH");
        assert_eq!(alert.source_file, "a.log");
        assert_eq!(alert.matched_pattern, "level=ERROR");
        assert_eq!(alert.log_line, "level=ERROR boom");
        assert!(alert.metadata.is_empty());
    }

    #[test]
    fn test_serialize_wire_format() {
        let (factory, _) = memory_factory();
        let alert = factory.build("a.log", "HIGH", r#""level":\s*"WARN""#, r#"{"level":"wARN"}"#);
        let value: serde_json::Value = serde_json::from_str(&factory.serialize(&alert)).unwrap();

        assert_eq!(value["sourceFile"], "a.log");
        assert_eq!(value["matchedPattern"], r#""level":\s*"WARN""#);
        assert_eq!(value["logLine"], r#"{"level":"wARN"}"#);
        assert_eq!(value["metadata"], serde_json::json!({}));
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_serialization_failure_payload() {
        let payload = to_wire(&Unserializable);
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value, serde_json::json!({ "error": SERIALIZATION_ERROR }));
    }

    #[test]
    fn test_raise_delivers_to_sink() {
        let (factory, sink) = memory_factory();
        assert!(factory.raise("a.log", "HIGH", "boom", "boom!", "console"));

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].log_line, "boom!");
    }

    #[test]
    fn test_sink_failure_is_contained() {
        let factory = AlertFactory::new(SinkRegistry::new(Arc::new(FailingSink)));
        assert!(!factory.send("{}", "anywhere"));
    }
}
