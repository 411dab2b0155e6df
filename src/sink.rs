//! Destinations for request log records.

use crate::kv::KeyValues;
use crate::level::Level;
use crate::record::{JsonAttrs, LogRecord};
use chrono::Utc;
use std::error::Error;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Structured logger receiving one record per request.
///
/// The request logger calls [`enabled`](LogSink::enabled) first and skips all
/// record assembly if the level is disabled. Records at [`Level::Error`] go
/// through [`error`](LogSink::error), all others through
/// [`info`](LogSink::info). Implementations own serialization and transport;
/// failures are theirs to handle, the request logger never retries.
pub trait LogSink: Send + Sync {
    fn enabled(&self, level: Level) -> bool;

    fn info(&self, level: Level, message: &str, attrs: &KeyValues);

    fn error(&self, err: Option<&(dyn Error + 'static)>, message: &str, attrs: &KeyValues);
}

/// Emits records as `tracing` events with target `httplog`.
///
/// The attributes are attached as a single `attrs` field rendered as a JSON
/// object, since `tracing` field names must be known at compile time.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn enabled(&self, level: Level) -> bool {
        match level {
            Level::Debug => tracing::enabled!(target: "httplog", tracing::Level::DEBUG),
            Level::Info => tracing::enabled!(target: "httplog", tracing::Level::INFO),
            Level::Warn => tracing::enabled!(target: "httplog", tracing::Level::WARN),
            Level::Error => tracing::enabled!(target: "httplog", tracing::Level::ERROR),
        }
    }

    fn info(&self, level: Level, message: &str, attrs: &KeyValues) {
        let attrs = JsonAttrs(attrs);
        match level {
            Level::Debug => tracing::debug!(target: "httplog", attrs = %attrs, "{}", message),
            Level::Info => tracing::info!(target: "httplog", attrs = %attrs, "{}", message),
            Level::Warn => tracing::warn!(target: "httplog", attrs = %attrs, "{}", message),
            Level::Error => tracing::error!(target: "httplog", attrs = %attrs, "{}", message),
        }
    }

    fn error(&self, err: Option<&(dyn Error + 'static)>, message: &str, attrs: &KeyValues) {
        let attrs = JsonAttrs(attrs);
        match err {
            Some(err) => tracing::error!(target: "httplog", error = err, attrs = %attrs, "{}", message),
            None => tracing::error!(target: "httplog", attrs = %attrs, "{}", message),
        }
    }
}

/// Writes each record as one JSON object per line.
pub struct JsonSink<W: Write + Send> {
    writer: Mutex<W>,
    min_level: Level,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            min_level: Level::Debug,
        }
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, level: Level, message: &str, attrs: &KeyValues) {
        let record = LogRecord {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            attrs: attrs.clone(),
        };

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = serde_json::to_writer(&mut *writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(writer));
        if let Err(err) = result {
            tracing::warn!("Failed to write request log record: {}", err);
        }
    }
}

impl JsonSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> LogSink for JsonSink<W> {
    fn enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }

    fn info(&self, level: Level, message: &str, attrs: &KeyValues) {
        self.write(level, message, attrs);
    }

    fn error(&self, err: Option<&(dyn Error + 'static)>, message: &str, attrs: &KeyValues) {
        match err {
            Some(err) => {
                let mut attrs = attrs.clone();
                attrs.push((crate::attrs::ERROR_KEY.to_string(), err.to_string().into()));
                self.write(Level::Error, message, &attrs);
            }
            None => self.write(Level::Error, message, attrs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn json_sink_writes_one_line_per_record() {
        let sink = JsonSink::new(Vec::new());
        sink.info(Level::Info, "first", &vec![("a".to_string(), json!(1))]);
        sink.error(None, "second", &vec![]);

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["msg"], json!("first"));
        assert_eq!(lines[0]["level"], json!("INFO"));
        assert_eq!(lines[0]["a"], json!(1));
        assert_eq!(lines[1]["level"], json!("ERROR"));
    }

    #[test]
    fn json_sink_respects_min_level() {
        let sink = JsonSink::new(Vec::new()).with_min_level(Level::Warn);

        assert!(!sink.enabled(Level::Info));
        assert!(sink.enabled(Level::Warn));
        assert!(sink.enabled(Level::Error));
    }

    #[test]
    fn json_sink_records_error_objects() {
        let sink = JsonSink::new(Vec::new());
        let err = crate::error::ClientAborted;
        sink.error(Some(&err), "failed", &vec![]);

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let record: Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(record["error"], json!(err.to_string()));
    }
}
