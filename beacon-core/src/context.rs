//! Per-event dispatch context
//!
//! A [`Context`] carries one [`Event`] through the queue and the plugin
//! pipeline, together with its delivery bookkeeping: the attempt counter,
//! the terminal failure (if any), and a small log of what happened to it.

use crate::error::Error;
use crate::event::Event;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Severity of a context log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A log line recorded against a single context.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// Dispatch state for a single event.
#[derive(Debug, Clone)]
pub struct Context {
    id: String,
    pub event: Event,
    attempts: u32,
    failed_delivery: Option<Arc<Error>>,
    halted_by: Option<String>,
    logs: Vec<LogEntry>,
}

impl Context {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            attempts: 0,
            failed_delivery: None,
            halted_by: None,
            logs: Vec::new(),
        }
    }

    /// Context used for registry operations that are not tied to an event.
    pub fn system() -> Self {
        Self::new(crate::factory::system_event())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of times the queue has accepted this context.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    /// Terminal delivery failure, set once the queue gives up on the event.
    pub fn failed_delivery(&self) -> Option<&Arc<Error>> {
        self.failed_delivery.as_ref()
    }

    pub(crate) fn set_failed_delivery(&mut self, error: Error) {
        self.log(LogLevel::Error, format!("delivery failed: {}", error));
        self.failed_delivery = Some(Arc::new(error));
    }

    /// Name of the middleware that stopped this event, if any.
    pub fn halted_by(&self) -> Option<&str> {
        self.halted_by.as_deref()
    }

    pub fn is_halted(&self) -> bool {
        self.halted_by.is_some()
    }

    pub(crate) fn halt(&mut self, by: &str) {
        self.log(LogLevel::Debug, format!("halted by {}", by));
        self.halted_by = Some(by.to_string());
    }

    /// Record a log line on the context and mirror it to `tracing`.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(context_id = %self.id, "{}", message),
            LogLevel::Info => tracing::info!(context_id = %self.id, "{}", message),
            LogLevel::Warn => tracing::warn!(context_id = %self.id, "{}", message),
            LogLevel::Error => tracing::error!(context_id = %self.id, "{}", message),
        }
        self.logs.push(LogEntry {
            level,
            message,
            time: Utc::now(),
        });
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_fresh() {
        let ctx = Context::system();
        assert_eq!(ctx.attempts(), 0);
        assert!(ctx.failed_delivery().is_none());
        assert!(!ctx.is_halted());
        assert!(ctx.logs().is_empty());
        assert!(!ctx.id().is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Context::system().id(), Context::system().id());
    }

    #[test]
    fn test_failure_is_logged() {
        let mut ctx = Context::system();
        ctx.set_failed_delivery(Error::Plugin("boom".to_string()));
        assert!(ctx.failed_delivery().is_some());
        assert_eq!(ctx.logs().len(), 1);
        assert_eq!(ctx.logs()[0].level, LogLevel::Error);
    }

    #[test]
    fn test_halt_records_middleware() {
        let mut ctx = Context::system();
        ctx.halt("Source Middleware filter");
        assert_eq!(ctx.halted_by(), Some("Source Middleware filter"));
    }
}
