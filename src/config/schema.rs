//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::security::repository::DEFAULT_AUTH_HEADER_NAME;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener and HTTP settings.
    pub server: ServerConfig,

    /// Token, login and user directory settings.
    pub security: SecurityConfig,

    /// Rate limiting rules and store settings.
    pub limiter: LimiterConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Prefix the application is mounted under ("" for the root).
    pub context_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            context_path: String::new(),
        }
    }
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Header carrying the bearer token in both directions.
    pub token_header: String,

    /// HS256 signing secret.
    pub jwt_secret: String,

    /// `iss` claim written into and required from tokens.
    pub issuer: String,

    /// Token lifetime in seconds; renewed on every authenticated response.
    pub token_ttl_secs: u64,

    /// Path handled by the form login handler.
    pub login_path: String,

    /// Methods that trigger the login handler.
    pub login_methods: Vec<String>,

    /// Demo user directory.
    pub users: Vec<UserConfig>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_header: DEFAULT_AUTH_HEADER_NAME.to_string(),
            // WARNING: This is a placeholder! Change this in production.
            jwt_secret: "CHANGE_ME_IN_PRODUCTION".to_string(),
            issuer: "request-guard".to_string(),
            token_ttl_secs: 3600,
            login_path: "/login".to_string(),
            login_methods: vec!["POST".to_string()],
            users: Vec::new(),
        }
    }
}

/// A user known to the demo directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    /// Identity key carried in tokens.
    pub id: String,

    pub username: String,

    /// Plain-text password (demo only).
    pub password: String,

    #[serde(default)]
    pub authorities: Vec<String>,

    #[serde(default = "default_true")]
    pub account_non_expired: bool,

    #[serde(default = "default_true")]
    pub account_non_locked: bool,

    #[serde(default = "default_true")]
    pub credentials_non_expired: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Calls admitted per key per window.
    pub capacity: u32,

    /// How often idle buckets are evicted, in seconds (0 disables).
    pub sweep_interval_secs: u64,

    /// Prefix argument-derived keys with the target and operation.
    pub include_operation_in_default_key: bool,

    /// Declared rules.
    pub rules: Vec<LimiterRuleConfig>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 1,
            sweep_interval_secs: 60,
            include_operation_in_default_key: false,
            rules: Vec::new(),
        }
    }
}

/// One rate-limit rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimiterRuleConfig {
    /// Target type (`http` for routes).
    pub target: String,

    /// Operation name (`"GET /limit"` for routes).
    pub operation: String,

    /// Key expression; argument list when absent.
    #[serde(default)]
    pub key: Option<String>,

    /// Window in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
