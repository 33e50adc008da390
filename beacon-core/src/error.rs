//! Error types for beacon-core

use thiserror::Error;

/// Main error type for the beacon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed caller input (consent categories, wrapper options)
    #[error("[Validation] {message} (Received: {received})")]
    Validation { message: String, received: String },

    /// Neither userId nor anonymousId was supplied, or a required id was empty
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// A plugin's `load` hook failed
    #[error("plugin {plugin} failed to load: {message}")]
    PluginLoad { plugin: String, message: String },

    /// A plugin's `process` hook failed during a pipeline pass
    #[error("plugin {plugin} failed to process event: {source}")]
    Dispatch {
        plugin: String,
        #[source]
        source: Box<Error>,
    },

    /// A plugin cancelled the event; `retry` decides whether it is requeued
    #[error("event cancelled by {plugin}: {reason}")]
    Cancelled {
        plugin: String,
        reason: String,
        retry: bool,
    },

    /// Terminal failure after every allowed attempt was used
    #[error("delivery failed after {attempts} attempts: {cause}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        cause: Box<Error>,
    },

    /// Free-form failure raised by plugin code
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// CDN settings could not be resolved
    #[error("settings error: {0}")]
    Settings(String),

    /// The event queue went away before the event settled
    #[error("event queue closed before delivery settled")]
    QueueClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Build a validation error, rendering the rejected value as JSON.
    pub fn validation(message: impl Into<String>, received: &serde_json::Value) -> Self {
        Error::Validation {
            message: message.into(),
            received: received.to_string(),
        }
    }

    /// Cancel the current event from inside a plugin.
    ///
    /// The pipeline fills in the plugin name.
    pub fn cancel(reason: impl Into<String>, retry: bool) -> Self {
        Error::Cancelled {
            plugin: String::new(),
            reason: reason.into(),
            retry,
        }
    }

    /// Whether the queue may requeue an event that failed with this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Cancelled { retry, .. } => *retry,
            Error::Dispatch { source, .. } => source.is_retryable(),
            _ => true,
        }
    }

    /// Name of the plugin a pipeline failure is attributed to, if any.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Error::Dispatch { plugin, .. }
            | Error::Cancelled { plugin, .. }
            | Error::PluginLoad { plugin, .. } => Some(plugin),
            Error::ExhaustedRetries { cause, .. } => cause.plugin(),
            _ => None,
        }
    }
}

/// Result type alias for beacon-core
pub type Result<T> = std::result::Result<T, Error>;
