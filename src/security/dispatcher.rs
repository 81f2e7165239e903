//! Path-keyed authentication dispatcher.
//!
//! # Responsibilities
//! - Normalize the request path and look up a registered [`AuthHandler`]
//! - Run at most one handler per request, only for its accepted methods
//! - Publish the principal on success, clear the context on failure
//! - Hand every other request to the inner service untouched
//!
//! # State Machine
//! ```text
//! unauthenticated-pending
//!     → handler returns principal  → status check → success handler
//!     → handler wrote a response   → that response
//!     → handler fails              → clear context → failure handler
//! ```
//!
//! # Design Decisions
//! - The registry is built before serving and read-only afterwards
//! - Success and failure handlers own the response; the inner service is
//!   never called for a dispatched request

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{NestedPath, State},
    http::{request::Parts, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::observability::metrics;
use crate::security::context::SecurityContextHolder;
use crate::security::error::{AuthenticationError, FailureKind};
use crate::security::principal::Principal;

/// Result of a handler's attempt.
#[derive(Debug)]
pub enum Attempt {
    Authenticated(Principal),
    /// The handler already produced the response (challenge, redirect, ...).
    Responded(Response),
}

/// Extracts credentials from a request and authenticates them.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    async fn attempt(&self, parts: &Parts, body: Body) -> Result<Attempt, AuthenticationError>;
}

pub trait SuccessHandler: Send + Sync {
    fn on_success(&self, parts: &Parts, principal: &Principal) -> Response;
}

pub trait FailureHandler: Send + Sync {
    fn on_failure(&self, parts: &Parts, error: &AuthenticationError) -> Response;
}

/// A handler plus the methods that trigger it.
#[derive(Clone)]
pub struct Registration {
    methods: Vec<Method>,
    handler: Arc<dyn AuthHandler>,
}

impl Registration {
    /// Triggered by `POST` only.
    pub fn new(handler: Arc<dyn AuthHandler>) -> Self {
        Self {
            methods: vec![Method::POST],
            handler,
        }
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn accepts(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }
}

/// Path info relative to a mount point, set by an outer layer.
#[derive(Debug, Clone)]
pub struct PathInfo(pub String);

/// Join a mount path and the path info beneath it.
pub fn canonical_path(route_path: &str, path_info: Option<&str>) -> String {
    match path_info {
        Some(info) if !route_path.is_empty() => format!("{}{}", route_path, info),
        Some(info) => info.to_string(),
        None => route_path.to_string(),
    }
}

pub struct AuthDispatcher {
    handlers: HashMap<String, Registration>,
    success_handler: Arc<dyn SuccessHandler>,
    failure_handler: Arc<dyn FailureHandler>,
    context_path: Option<String>,
}

impl AuthDispatcher {
    pub fn new(success_handler: Arc<dyn SuccessHandler>, failure_handler: Arc<dyn FailureHandler>) -> Self {
        Self {
            handlers: HashMap::new(),
            success_handler,
            failure_handler,
            context_path: None,
        }
    }

    /// Strip this prefix from request paths before lookup.
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        let context_path = context_path.into();
        let trimmed = context_path.trim_end_matches('/');
        self.context_path = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Register a handler; a later registration for the same path wins.
    pub fn register(&mut self, path: impl Into<String>, registration: Registration) -> &mut Self {
        let path = path.into();
        if self.handlers.insert(path.clone(), registration).is_some() {
            tracing::debug!(path = %path, "Replaced authentication handler");
        }
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// The canonical path used as the registry key.
    pub fn request_path<B>(&self, request: &Request<B>) -> String {
        let path = request.uri().path();

        if let Some(nested) = request.extensions().get::<NestedPath>() {
            return canonical_path(nested.as_str().trim_end_matches('/'), Some(path));
        }

        let route_path = match &self.context_path {
            Some(prefix) => match path.strip_prefix(prefix.as_str()) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
                _ => path,
            },
            None => path,
        };
        let path_info = request.extensions().get::<PathInfo>().map(|info| info.0.as_str());
        canonical_path(route_path, path_info)
    }

    /// Authenticate `request` if it targets a registered path, otherwise pass
    /// it to `chain` unchanged.
    pub async fn dispatch<C, Fut>(&self, request: Request<Body>, chain: C) -> Response
    where
        C: FnOnce(Request<Body>) -> Fut,
        Fut: Future<Output = Response>,
    {
        let path = self.request_path(&request);
        let registration = match self.handlers.get(&path) {
            Some(registration) if registration.accepts(request.method()) => registration,
            _ => return chain(request).await,
        };

        if SecurityContextHolder::in_scope() {
            self.authenticate(&path, registration, request).await
        } else {
            SecurityContextHolder::scope(self.authenticate(&path, registration, request)).await
        }
    }

    async fn authenticate(&self, path: &str, registration: &Registration, request: Request<Body>) -> Response {
        tracing::debug!(path = %path, method = %request.method(), "Authentication attempt started");

        let (parts, body) = request.into_parts();
        let principal = match registration.handler.attempt(&parts, body).await {
            Ok(Attempt::Authenticated(principal)) => principal,
            Ok(Attempt::Responded(response)) => return response,
            Err(failed) => return self.unsuccessful(&parts, failed),
        };

        if let Err(failed) = principal.check_status() {
            return self.unsuccessful(&parts, failed);
        }
        self.successful(&parts, principal)
    }

    fn successful(&self, parts: &Parts, principal: Principal) -> Response {
        tracing::debug!(principal = %principal, "Authentication succeeded, updating security context");
        metrics::record_auth_attempt("success");

        if let Err(e) = SecurityContextHolder::set(principal.clone()) {
            tracing::error!(error = %e, "Could not publish authenticated principal");
        }
        self.success_handler.on_success(parts, &principal)
    }

    fn unsuccessful(&self, parts: &Parts, failed: AuthenticationError) -> Response {
        SecurityContextHolder::clear();

        match failed.kind() {
            FailureKind::Internal => {
                tracing::error!(error = %failed, "An internal error occurred while trying to authenticate the user");
                metrics::record_auth_attempt("internal_error");
            }
            FailureKind::Credentials => {
                tracing::debug!(error = %failed, "Authentication failed");
                metrics::record_auth_attempt("failure");
            }
        }
        self.failure_handler.on_failure(parts, &failed)
    }
}

/// Middleware adapter for [`AuthDispatcher::dispatch`].
pub async fn auth_dispatch_middleware(
    State(dispatcher): State<Arc<AuthDispatcher>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    dispatcher.dispatch(request, |request| next.run(request)).await
}

/// Responds `200` with a JSON summary of the principal.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSuccessHandler;

impl SuccessHandler for JsonSuccessHandler {
    fn on_success(&self, _parts: &Parts, principal: &Principal) -> Response {
        Json(json!({
            "id": principal.id(),
            "authorities": principal.authorities().collect::<Vec<_>>(),
        }))
        .into_response()
    }
}

/// Responds `401` for credential failures and `500` for internal ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFailureHandler;

impl FailureHandler for JsonFailureHandler {
    fn on_failure(&self, _parts: &Parts, error: &AuthenticationError) -> Response {
        let (status, message) = match error.kind() {
            FailureKind::Credentials => (StatusCode::UNAUTHORIZED, error.to_string()),
            FailureKind::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authentication service unavailable".to_string(),
            ),
        };
        (status, Json(json!({ "error": error.code(), "message": message }))).into_response()
    }
}
