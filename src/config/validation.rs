//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ttl > 0, capacity > 0, windows > 0)
//! - Check names that must parse later (methods, headers, bind address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::{HeaderName, Method};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GuardConfig;

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Method names are matched case-insensitively, ignoring surrounding space.
pub fn parse_method(name: &str) -> Option<Method> {
    Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes()).ok()
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("server.bind_address", "not a socket address"));
    }
    let context_path = &config.server.context_path;
    if !context_path.is_empty() && !context_path.starts_with('/') {
        errors.push(ValidationError::new("server.context_path", "must start with '/'"));
    }

    let security = &config.security;
    if HeaderName::from_bytes(security.token_header.as_bytes()).is_err() {
        errors.push(ValidationError::new("security.token_header", "not a valid header name"));
    }
    if security.jwt_secret.is_empty() {
        errors.push(ValidationError::new("security.jwt_secret", "must not be empty"));
    }
    if security.token_ttl_secs == 0 {
        errors.push(ValidationError::new("security.token_ttl_secs", "must be greater than zero"));
    }
    if !security.login_path.starts_with('/') {
        errors.push(ValidationError::new("security.login_path", "must start with '/'"));
    }
    if security.login_methods.is_empty() {
        errors.push(ValidationError::new("security.login_methods", "must name at least one method"));
    }
    for method in &security.login_methods {
        if parse_method(method).is_none() {
            errors.push(ValidationError::new(
                "security.login_methods",
                format!("'{}' is not an HTTP method", method),
            ));
        }
    }

    let mut ids = HashSet::new();
    let mut usernames = HashSet::new();
    for (i, user) in security.users.iter().enumerate() {
        if user.id.is_empty() {
            errors.push(ValidationError::new(format!("security.users[{}].id", i), "must not be empty"));
        } else if !ids.insert(user.id.as_str()) {
            errors.push(ValidationError::new(
                format!("security.users[{}].id", i),
                format!("duplicate id '{}'", user.id),
            ));
        }
        if !usernames.insert(user.username.as_str()) {
            errors.push(ValidationError::new(
                format!("security.users[{}].username", i),
                format!("duplicate username '{}'", user.username),
            ));
        }
    }

    if config.limiter.capacity == 0 {
        errors.push(ValidationError::new("limiter.capacity", "must be greater than zero"));
    }
    for (i, rule) in config.limiter.rules.iter().enumerate() {
        if rule.timeout_ms == 0 {
            errors.push(ValidationError::new(
                format!("limiter.rules[{}].timeout_ms", i),
                "must be greater than zero",
            ));
        }
        if rule.target.is_empty() || rule.operation.is_empty() {
            errors.push(ValidationError::new(
                format!("limiter.rules[{}]", i),
                "target and operation are required",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
