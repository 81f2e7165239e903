//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the demo handlers
//! - Wire up the security layers (context persistence, login dispatch)
//! - Attach rate-limit rules to routes
//! - Wire up ambient middleware (tracing, timeout, request ID)
//! - Sweep idle limiter buckets until shutdown
//!
//! # Layer Order (outermost first)
//! ```text
//! request ID → trace → timeout → context persistence → login dispatch
//!     → router → rate limit (per route) → handler
//! ```

use axum::{
    http::{StatusCode, Uri},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{validation::parse_method, GuardConfig};
use crate::http::directory::UserDirectory;
use crate::limiter::{
    interceptor::rate_limit_middleware, LimiterError, LimiterInterceptor, LoggingErrorHandler,
    MemoryFrequencyLimiter, StaticOperationSource,
};
use crate::security::{
    dispatcher::{auth_dispatch_middleware, JsonFailureHandler, JsonSuccessHandler},
    repository::context_persistence_middleware,
    AuthDispatcher, ContextRepository, CurrentPrincipal, HeaderContextRepository, JwtTokenProvider, Registration,
    SecurityError,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Limiter(#[from] LimiterError),

    #[error("Invalid login method `{0}`")]
    InvalidMethod(String),
}

/// HTTP server for the guarded demo application.
pub struct GuardServer {
    router: Router,
    config: GuardConfig,
    limiter: Arc<MemoryFrequencyLimiter>,
}

impl GuardServer {
    /// Assemble the security and limiter components from `config`.
    pub fn new(config: GuardConfig) -> Result<Self, ServerError> {
        let directory = Arc::new(UserDirectory::new(&config.security.users));

        let provider = Arc::new(JwtTokenProvider::from_config(&config.security).with_resolver(directory.clone()));
        let repository: Arc<dyn ContextRepository> =
            Arc::new(HeaderContextRepository::new(provider).with_header_name(&config.security.token_header)?);

        let login_methods = config
            .security
            .login_methods
            .iter()
            .map(|m| parse_method(m).ok_or_else(|| ServerError::InvalidMethod(m.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let mut dispatcher = AuthDispatcher::new(Arc::new(JsonSuccessHandler), Arc::new(JsonFailureHandler))
            .with_context_path(config.server.context_path.clone());
        dispatcher.register(
            config.security.login_path.clone(),
            Registration::new(directory.clone()).methods(login_methods),
        );

        let limiter = Arc::new(MemoryFrequencyLimiter::new(config.limiter.capacity));
        let interceptor = Arc::new(
            LimiterInterceptor::builder()
                .operation_source(Arc::new(StaticOperationSource::from_config(&config.limiter.rules)))
                .limiter(limiter.clone())
                .error_handler(Arc::new(LoggingErrorHandler))
                .include_operation_in_default_key(config.limiter.include_operation_in_default_key)
                .build()?,
        );

        tracing::info!(
            users = directory.len(),
            login_path = %config.security.login_path,
            limiter_rules = config.limiter.rules.len(),
            "Security components initialized"
        );

        let router = Self::build_router(&config, repository, Arc::new(dispatcher), interceptor);
        Ok(Self {
            router,
            config,
            limiter,
        })
    }

    fn build_router(
        config: &GuardConfig,
        repository: Arc<dyn ContextRepository>,
        dispatcher: Arc<AuthDispatcher>,
        interceptor: Arc<LimiterInterceptor>,
    ) -> Router {
        let routes = Router::new()
            .route("/hello", get(hello))
            .route("/admin", get(admin))
            .route("/limit", get(limit))
            .route_layer(from_fn_with_state(interceptor, rate_limit_middleware));

        let context_path = config.server.context_path.trim_end_matches('/');
        let app = if context_path.is_empty() {
            routes
        } else {
            Router::new().nest(context_path, routes)
        };

        app.fallback(not_found)
            .layer(from_fn_with_state(dispatcher, auth_dispatch_middleware))
            .layer(from_fn_with_state(repository, context_persistence_middleware))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::with_status_code(
                        StatusCode::REQUEST_TIMEOUT,
                        Duration::from_secs(config.server.request_timeout_secs),
                    )),
            )
    }

    /// The assembled router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweep_interval = self.config.limiter.sweep_interval_secs;
        if sweep_interval > 0 {
            let limiter = self.limiter.clone();
            let sweeper_shutdown = shutdown.resubscribe();
            tokio::spawn(sweep_idle_buckets(limiter, Duration::from_secs(sweep_interval), sweeper_shutdown));
        }

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}

async fn sweep_idle_buckets(
    limiter: Arc<MemoryFrequencyLimiter>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = limiter.evict_idle();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = limiter.tracked_keys(), "Evicted idle limiter buckets");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn hello(principal: CurrentPrincipal) -> Result<Json<Value>, (StatusCode, &'static str)> {
    let principal = principal.require("ROLE_user")?;
    Ok(Json(json!({ "message": format!("hello world : {}", principal.id()) })))
}

async fn admin(principal: CurrentPrincipal) -> Result<Json<Value>, (StatusCode, &'static str)> {
    let principal = principal.require("ROLE_admin")?;
    Ok(Json(json!({ "message": format!("hello world : {}", principal.id()) })))
}

async fn limit() -> &'static str {
    "limit content"
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (StatusCode::NOT_FOUND, format!("No route for {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimiterRuleConfig, UserConfig};
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    fn config() -> GuardConfig {
        let mut config = GuardConfig::default();
        config.security.jwt_secret = "test-secret".into();
        config.security.users.push(UserConfig {
            id: "u1".into(),
            username: "alice".into(),
            password: "secret".into(),
            authorities: vec!["ROLE_user".into()],
            account_non_expired: true,
            account_non_locked: true,
            credentials_non_expired: true,
            enabled: true,
        });
        config.limiter.rules.push(LimiterRuleConfig {
            target: "http".into(),
            operation: "GET /limit".into(),
            key: Some("'content'".into()),
            timeout_ms: 60_000,
        });
        config
    }

    fn login_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=alice&password=secret"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_then_hello() {
        let server = GuardServer::new(config()).unwrap();

        let response = server.router().oneshot(login_request("/login")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let token = response.headers().get(header::AUTHORIZATION).unwrap().clone();

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/hello")
                    .header(header::AUTHORIZATION, token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_login_under_context_path() {
        let mut config = config();
        config.server.context_path = "/app".into();
        let server = GuardServer::new(config).unwrap();

        let response = server.router().oneshot(login_request("/app/login")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = server
            .router()
            .oneshot(Request::builder().uri("/app/limit").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_methods_are_normalised() {
        let mut config = config();
        config.security.login_methods = vec![" post".into()];
        let server = GuardServer::new(config).unwrap();

        let response = server.router().oneshot(login_request("/login")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let server = GuardServer::new(config()).unwrap();
        let response = server
            .router()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_token_header_is_rejected() {
        let mut config = config();
        config.security.token_header = "bad header".into();
        assert!(matches!(GuardServer::new(config), Err(ServerError::Security(_))));
    }
}
