//! Rate-limit interceptor.
//!
//! # Responsibilities
//! - Look up the rules declared for an invocation
//! - Resolve one key per rule (expression or argument list)
//! - Consult the limiter store and stop at the first rejection
//! - Run the wrapped call only when every rule admits it
//!
//! # Design Decisions
//! - Interception is explicit: callers wrap a call in [`LimiterInterceptor::invoke`]
//!   or a target in [`Limited`], there is no runtime proxying
//! - Rejections and store faults go to the error handler, never the caller
//! - Broken key expressions are configuration errors and are returned

use axum::{
    body::Body,
    extract::{MatchedPath, Query, State},
    http::{header::RETRY_AFTER, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::limiter::error::{LimitExceeded, LimiterError, LimiterErrorHandler};
use crate::limiter::expression::{key_fragment, Argument, EvaluationContext, ExpressionCache};
use crate::limiter::operation::{LimiterOperation, LimiterOperationSource};
use crate::limiter::store::FrequencyLimiter;
use crate::security::context::SecurityContextHolder;
use crate::security::principal::Principal;

/// Target type used for rules applied to HTTP routes.
pub const HTTP_TARGET: &str = "http";

/// A call about to be made: what is called, on what, with which arguments.
#[derive(Debug, Clone)]
pub struct Invocation {
    target_type: String,
    operation: String,
    arguments: Vec<Argument>,
    target: Value,
}

impl Invocation {
    pub fn new(target_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            operation: operation.into(),
            arguments: Vec::new(),
            target: Value::Null,
        }
    }

    /// An invocation on `T`, named by its type.
    pub fn of<T: ?Sized>(operation: impl Into<String>) -> Self {
        Self::new(std::any::type_name::<T>(), operation)
    }

    /// Capture a named argument.
    pub fn arg<V>(self, name: impl Into<String>, value: &V) -> Result<Self, LimiterError>
    where
        V: Serialize + ?Sized,
    {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|e| LimiterError::Argument {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(self.value_arg(name, value))
    }

    pub fn value_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.push(Argument {
            name: name.into(),
            value,
        });
        self
    }

    /// Expose the call target's state to key expressions.
    pub fn with_target(mut self, target: Value) -> Self {
        self.target = target;
        self
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// The arguments rendered positionally, e.g. `[42, ann]`.
    pub fn default_key(&self) -> String {
        let parts: Vec<String> = self.arguments.iter().map(|arg| key_fragment(&arg.value)).collect();
        format!("[{}]", parts.join(", "))
    }

    fn evaluation_context(&self) -> EvaluationContext<'_> {
        EvaluationContext {
            operation: &self.operation,
            arguments: &self.arguments,
            target: &self.target,
            target_type: &self.target_type,
        }
    }
}

/// Outcome of checking an invocation against its rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Limited(LimitExceeded),
    /// The store failed; the handler has been told.
    StoreFailed,
}

pub struct LimiterInterceptor {
    source: Arc<dyn LimiterOperationSource>,
    limiter: Arc<dyn FrequencyLimiter>,
    error_handler: Arc<dyn LimiterErrorHandler>,
    expressions: ExpressionCache,
    include_operation_in_default_key: bool,
}

impl LimiterInterceptor {
    pub fn builder() -> LimiterInterceptorBuilder {
        LimiterInterceptorBuilder::default()
    }

    pub fn expressions(&self) -> &ExpressionCache {
        &self.expressions
    }

    /// Evaluate every rule for `invocation`, stopping at the first rejection.
    pub fn check(&self, invocation: &Invocation) -> Result<Admission, LimiterError> {
        let operations = self
            .source
            .limiter_operations(&invocation.operation, &invocation.target_type);

        for operation in operations {
            let key = self.resolve_key(operation, invocation)?;

            match self.limiter.try_acquire(&key, operation.timeout) {
                Ok(remaining) if !remaining.is_zero() => {
                    tracing::debug!(
                        target_type = %invocation.target_type,
                        operation = %invocation.operation,
                        remaining_ms = remaining.as_millis() as u64,
                        "Limited invocation"
                    );
                    let exceeded = LimitExceeded {
                        key,
                        remaining,
                        window: operation.timeout,
                    };
                    self.error_handler.on_limited(&exceeded);
                    return Ok(Admission::Limited(exceeded));
                }
                Ok(_) => {}
                Err(error) => {
                    self.error_handler.on_store_error(&error, &key);
                    return Ok(Admission::StoreFailed);
                }
            }
        }

        Ok(Admission::Admitted)
    }

    /// Run `proceed` if admitted; `Ok(None)` when the call was suppressed.
    pub async fn invoke<F, Fut, T>(&self, invocation: &Invocation, proceed: F) -> Result<Option<T>, LimiterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.check(invocation)? {
            Admission::Admitted => Ok(Some(proceed().await)),
            Admission::Limited(_) | Admission::StoreFailed => Ok(None),
        }
    }

    /// Synchronous variant of [`LimiterInterceptor::invoke`].
    pub fn invoke_sync<F, T>(&self, invocation: &Invocation, proceed: F) -> Result<Option<T>, LimiterError>
    where
        F: FnOnce() -> T,
    {
        match self.check(invocation)? {
            Admission::Admitted => Ok(Some(proceed())),
            Admission::Limited(_) | Admission::StoreFailed => Ok(None),
        }
    }

    fn resolve_key(&self, operation: &LimiterOperation, invocation: &Invocation) -> Result<String, LimiterError> {
        if let Some(source) = operation.key_expression() {
            let expression = self.expressions.get_or_parse(source)?;
            return expression.evaluate(&invocation.evaluation_context());
        }

        if self.include_operation_in_default_key {
            Ok(format!(
                "{}#{}{}",
                invocation.target_type,
                invocation.operation,
                invocation.default_key()
            ))
        } else {
            Ok(invocation.default_key())
        }
    }
}

/// Builder for [`LimiterInterceptor`]; `build` fails fast on missing parts.
#[derive(Default)]
pub struct LimiterInterceptorBuilder {
    source: Option<Arc<dyn LimiterOperationSource>>,
    limiter: Option<Arc<dyn FrequencyLimiter>>,
    error_handler: Option<Arc<dyn LimiterErrorHandler>>,
    include_operation_in_default_key: bool,
}

impl LimiterInterceptorBuilder {
    pub fn operation_source(mut self, source: Arc<dyn LimiterOperationSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn limiter(mut self, limiter: Arc<dyn FrequencyLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn LimiterErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Prefix default keys with `target#operation` so different operations
    /// with equal arguments get separate buckets.
    pub fn include_operation_in_default_key(mut self, include: bool) -> Self {
        self.include_operation_in_default_key = include;
        self
    }

    pub fn build(self) -> Result<LimiterInterceptor, LimiterError> {
        Ok(LimiterInterceptor {
            source: self
                .source
                .ok_or(LimiterError::MissingComponent("limiterOperationSource"))?,
            error_handler: self
                .error_handler
                .ok_or(LimiterError::MissingComponent("errorHandler"))?,
            limiter: self.limiter.ok_or(LimiterError::MissingComponent("limiter"))?,
            expressions: ExpressionCache::new(),
            include_operation_in_default_key: self.include_operation_in_default_key,
        })
    }
}

/// A target whose calls go through a [`LimiterInterceptor`].
///
/// Rules are looked up under the inner type's name, not the wrapper's.
pub struct Limited<T> {
    inner: T,
    interceptor: Arc<LimiterInterceptor>,
}

impl<T> Limited<T> {
    pub fn new(inner: T, interceptor: Arc<LimiterInterceptor>) -> Self {
        Self { inner, interceptor }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Start describing a call to `operation` on the inner target.
    pub fn invocation(&self, operation: impl Into<String>) -> Invocation {
        Invocation::of::<T>(operation)
    }

    pub async fn call<'a, F, Fut, R>(&'a self, invocation: Invocation, f: F) -> Result<Option<R>, LimiterError>
    where
        F: FnOnce(&'a T) -> Fut,
        Fut: Future<Output = R>,
    {
        self.interceptor.invoke(&invocation, || f(&self.inner)).await
    }

    pub fn call_sync<'a, F, R>(&'a self, invocation: Invocation, f: F) -> Result<Option<R>, LimiterError>
    where
        F: FnOnce(&'a T) -> R,
    {
        self.interceptor.invoke_sync(&invocation, || f(&self.inner))
    }
}

/// Apply route rules to HTTP requests.
///
/// The operation is `"<METHOD> <matched path>"`; arguments are the query
/// parameters (`#query`) and the caller's identity key (`#principal`).
pub async fn rate_limit_middleware(
    State(interceptor): State<Arc<LimiterInterceptor>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let operation = format!("{} {}", request.method(), path);

    let query = Query::<BTreeMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(params)| params)
        .unwrap_or_default();
    let principal = request
        .extensions()
        .get::<Principal>()
        .cloned()
        .or_else(SecurityContextHolder::get)
        .map(|p| Value::String(p.id().to_string()))
        .unwrap_or(Value::Null);

    let invocation = Invocation::new(HTTP_TARGET, operation)
        .value_arg("query", serde_json::to_value(query).unwrap_or(Value::Null))
        .value_arg("principal", principal);

    match interceptor.check(&invocation) {
        Ok(Admission::Admitted) => next.run(request).await,
        Ok(Admission::Limited(exceeded)) => {
            let retry_after = retry_after_secs(exceeded.remaining);
            let mut response = (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
        Ok(Admission::StoreFailed) => (StatusCode::SERVICE_UNAVAILABLE, "Rate limiter unavailable").into_response(),
        Err(e) => {
            tracing::error!(error = %e, operation = %invocation.operation(), "Rate limit rule misconfigured");
            (StatusCode::INTERNAL_SERVER_ERROR, "Rate limit rule misconfigured").into_response()
        }
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}
