//! Limiter errors and the pluggable rejection handler.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum LimiterError {
    /// The limiter store failed; the call is suppressed.
    #[error("Limiter store failure: {0}")]
    Store(String),

    #[error("Invalid key expression `{expression}`: {reason}")]
    Parse { expression: String, reason: String },

    #[error("Key expression `{expression}` failed: {reason}")]
    Evaluation { expression: String, reason: String },

    #[error("Argument `{name}` could not be captured: {reason}")]
    Argument { name: String, reason: String },

    /// The interceptor was built without a required collaborator.
    #[error("The '{0}' property is required")]
    MissingComponent(&'static str),
}

/// A rejected call: the key, how long until it may retry, and its window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitExceeded {
    pub key: String,
    pub remaining: Duration,
    pub window: Duration,
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rate limit exceeded for `{}`: retry in {}ms (window {}ms)",
            self.key,
            self.remaining.as_millis(),
            self.window.as_millis()
        )
    }
}

/// Decides what happens to limited calls and store failures.
pub trait LimiterErrorHandler: Send + Sync {
    fn on_limited(&self, exceeded: &LimitExceeded);

    fn on_store_error(&self, error: &LimiterError, key: &str);
}

/// Logs and counts; the suppressed call simply returns nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

impl LimiterErrorHandler for LoggingErrorHandler {
    fn on_limited(&self, exceeded: &LimitExceeded) {
        tracing::warn!(
            key = %exceeded.key,
            remaining_ms = exceeded.remaining.as_millis() as u64,
            window_ms = exceeded.window.as_millis() as u64,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited();
    }

    fn on_store_error(&self, error: &LimiterError, key: &str) {
        tracing::error!(key = %key, error = %error, "Limiter store failed; call suppressed");
        metrics::record_limiter_error();
    }
}
