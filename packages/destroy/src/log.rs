// ABOUTME: Operator-facing log stream for a remote destroy
// ABOUTME: Tracks the current stage and buffers entries for downstream consumers

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::Stage;

/// Message that tells downstream consumers the stream is finished
pub const EOF_SENTINEL: &str = "EOF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level as written by the nested command; unknown levels are info
    pub fn parse(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "debug" | "trace" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" | "fatal" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub stage: Option<String>,
    pub message: String,
}

#[derive(Debug, Default)]
struct LogState {
    stage: Option<Stage>,
    entries: Vec<LogEntry>,
}

/// Cloneable handle; all clones share the same stream
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    inner: Arc<Mutex<LogState>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        // A panic while holding the lock leaves plain data behind, keep using it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_stage(&self, stage: Stage) {
        debug!("Stage: {}", stage);
        self.state().stage = Some(stage);
    }

    pub fn stage(&self) -> Option<Stage> {
        self.state().stage.clone()
    }

    pub fn add_to_buffer(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }

        let mut state = self.state();
        let stage = state.stage.as_ref().map(|s| s.to_string());
        state.entries.push(LogEntry {
            timestamp: Utc::now(),
            level,
            stage,
            message,
        });
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.state().entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_record_current_stage() {
        let log = ExecutionLog::new();
        log.add_to_buffer(LogLevel::Info, "before");
        log.set_stage(Stage::Done);
        log.add_to_buffer(LogLevel::Info, EOF_SENTINEL);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stage, None);
        assert_eq!(entries[1].stage.as_deref(), Some("done"));
        assert_eq!(entries[1].message, EOF_SENTINEL);
    }

    #[test]
    fn test_clones_share_stream() {
        let log = ExecutionLog::new();
        let handle = log.clone();
        handle.set_stage(Stage::RemoteDeploy);
        handle.add_to_buffer(LogLevel::Warn, "slow build");

        assert_eq!(log.stage(), Some(Stage::RemoteDeploy));
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(LogLevel::parse("ERROR"), LogLevel::Error);
        assert_eq!(LogLevel::parse("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("something"), LogLevel::Info);
    }
}
