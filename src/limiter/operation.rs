//! Declared rate-limit rules and where they come from.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::LimiterRuleConfig;

/// One rule attached to an operation: an optional key expression and a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterOperation {
    pub key: Option<String>,
    pub timeout: Duration,
}

impl LimiterOperation {
    /// Keyed by the call's arguments.
    pub fn new(timeout: Duration) -> Self {
        Self { key: None, timeout }
    }

    /// Keyed by evaluating `key` against the call.
    pub fn keyed(key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            key: Some(key.into()),
            timeout,
        }
    }

    /// The key expression, if one with actual text was given.
    pub fn key_expression(&self) -> Option<&str> {
        self.key.as_deref().filter(|key| !key.trim().is_empty())
    }
}

/// Finds the rules declared for an operation on a target type.
pub trait LimiterOperationSource: Send + Sync {
    /// Rules in declaration order; empty when the operation is not limited.
    fn limiter_operations(&self, operation: &str, target_type: &str) -> &[LimiterOperation];
}

/// Rules registered up front, keyed by `(target_type, operation)`.
#[derive(Debug, Default, Clone)]
pub struct StaticOperationSource {
    rules: HashMap<(String, String), Vec<LimiterOperation>>,
}

impl StaticOperationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(rules: &[LimiterRuleConfig]) -> Self {
        let mut source = Self::new();
        for rule in rules {
            let operation = match &rule.key {
                Some(key) => LimiterOperation::keyed(key.clone(), Duration::from_millis(rule.timeout_ms)),
                None => LimiterOperation::new(Duration::from_millis(rule.timeout_ms)),
            };
            source.add(&rule.target, &rule.operation, operation);
        }
        source
    }

    /// Append a rule; rules for one operation keep their insertion order.
    pub fn add(&mut self, target_type: &str, operation: &str, rule: LimiterOperation) -> &mut Self {
        self.rules
            .entry((target_type.to_string(), operation.to_string()))
            .or_default()
            .push(rule);
        self
    }

    pub fn with(mut self, target_type: &str, operation: &str, rule: LimiterOperation) -> Self {
        self.add(target_type, operation, rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl LimiterOperationSource for StaticOperationSource {
    fn limiter_operations(&self, operation: &str, target_type: &str) -> &[LimiterOperation] {
        self.rules
            .get(&(target_type.to_string(), operation.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
