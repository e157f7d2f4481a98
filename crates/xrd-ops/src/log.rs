use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a [`Log`], mirrored after the levels `tracing` already
/// defines so that mapping one to the other is a total function.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// A single structured log record, as emitted to stderr in JSON form.
///
/// This is the schema that `mon-roll`'s periodic roll-up events and every
/// other component's diagnostics are rendered as; it exists so that a log
/// aggregator downstream of stderr has one shape to parse rather than one
/// per component.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Log {
    #[serde(
        serialize_with = "time::serde::rfc3339::serialize",
        deserialize_with = "time::serde::rfc3339::deserialize"
    )]
    pub ts: time::OffsetDateTime,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Log {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Log {
            ts: time::OffsetDateTime::now_utc(),
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.fields.insert(key.into(), value);
        }
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serializes_rfc3339_and_drops_empty_fields() {
        let log = Log::new(LogLevel::Warn, "disk getting full")
            .with_field("free_bytes", 1024u64)
            .with_field("mount", "/data");

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["level"], "warn");
        assert_eq!(json["message"], "disk getting full");
        assert_eq!(json["fields"]["free_bytes"], 1024);
        assert_eq!(json["fields"]["mount"], "/data");

        let bare = Log::new(LogLevel::Info, "hello");
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("fields").is_none());
    }

    #[test]
    fn level_ordering_matches_severity() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }
}
