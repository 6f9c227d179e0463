//! Structured log entries for embedders
//!
//! Machines log through a [`Logger`], which always emits a `tracing` event and,
//! when a [`LogSink`] callback is installed, also hands a [`LogEntry`] to it.

use crate::Result;
use crate::fsm::ProviderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single log line produced by a provider machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub provider: ProviderId,
    pub state: String,
    pub message: String,
}

/// Callback receiving every log entry
pub type LogSink = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// Per-machine logger
#[derive(Clone)]
pub struct Logger {
    provider: ProviderId,
    sink: Option<LogSink>,
}

impl Logger {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Option<LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn log(&self, level: LogLevel, state: &str, message: impl Into<String>) {
        let message = message.into();
        let provider = self.provider;
        match level {
            LogLevel::Debug => tracing::debug!(%provider, state, "{}", message),
            LogLevel::Info => tracing::info!(%provider, state, "{}", message),
            LogLevel::Warn => tracing::warn!(%provider, state, "{}", message),
            LogLevel::Error => tracing::error!(%provider, state, "{}", message),
        }

        if let Some(sink) = &self.sink {
            sink(&LogEntry {
                timestamp: Utc::now(),
                level,
                provider,
                state: state.to_string(),
                message,
            });
        }
    }

    pub fn debug(&self, state: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, state, message);
    }

    pub fn info(&self, state: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, state, message);
    }

    pub fn warn(&self, state: &str, message: impl Into<String>) {
        self.log(LogLevel::Warn, state, message);
    }

    pub fn error(&self, state: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, state, message);
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("provider", &self.provider)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Sink appending entries as JSON lines to a file
pub fn json_lines_sink(path: &Path) -> Result<LogSink> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file: Mutex<File> = Mutex::new(OpenOptions::new().create(true).append(true).open(path)?);

    Ok(Arc::new(move |entry: &LogEntry| {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize log entry: {}", e);
                return;
            }
        };
        let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!("Failed to write log entry: {}", e);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_forwards_to_sink() {
        let seen: Arc<Mutex<Vec<LogEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let collector = seen.clone();
        let sink: LogSink = Arc::new(move |entry| collector.lock().unwrap().push(entry.clone()));

        let logger = Logger::new(ProviderId::Google).with_sink(Some(sink));
        logger.info("Idle", "Idle -> RedirectingToProvider");
        logger.warn("Idle", "invalid action");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].provider, ProviderId::Google);
        assert_eq!(seen[0].level, LogLevel::Info);
        assert_eq!(seen[1].message, "invalid action");
    }

    #[test]
    fn test_json_lines_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("auth.jsonl");
        let sink = json_lines_sink(&path).unwrap();

        let logger = Logger::new(ProviderId::Email).with_sink(Some(sink));
        logger.info("Idle", "first");
        logger.error("AuthFailed", "second");

        let content = std::fs::read_to_string(&path).unwrap();
        let entries: Vec<LogEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].state, "AuthFailed");
        assert_eq!(entries[1].level, LogLevel::Error);
    }
}
