//! Header-backed security-context repository.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → contains() (header present?)
//!     → load() (token → context, anonymous on any miss)
//!     → SecurityContextHolder + request extensions
//!     → inner service
//! Outgoing response:
//!     → save() (fresh token for the principal → same header)
//!     → holder slot dropped with the scope
//! ```
//!
//! # Design Decisions
//! - A missing, invalid or foreign token is "no identity", never an error
//! - Every authenticated response carries a renewed token (sliding expiry)
//! - A principal without an identity key is a configuration error

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::security::context::{SecurityContext, SecurityContextHolder};
use crate::security::error::SecurityError;
use crate::security::token::{DecodedToken, TokenProvider};

pub const DEFAULT_AUTH_HEADER_NAME: &str = "Authorization";

const BEARER_PREFIX: &str = "Bearer ";

/// Loads and stores security contexts across requests.
pub trait ContextRepository: Send + Sync {
    /// Never fails; returns an anonymous context when no identity is found.
    fn load(&self, headers: &HeaderMap) -> SecurityContext;

    fn save(&self, context: &SecurityContext, response: &mut Response) -> Result<(), SecurityError>;

    fn contains(&self, headers: &HeaderMap) -> bool;
}

/// Carries the context as a bearer token in a single request/response header.
pub struct HeaderContextRepository {
    header_name: HeaderName,
    provider: Arc<dyn TokenProvider>,
}

impl HeaderContextRepository {
    /// Uses the `Authorization` header.
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            header_name: AUTHORIZATION,
            provider,
        }
    }

    pub fn with_header_name(mut self, name: &str) -> Result<Self, SecurityError> {
        self.header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| SecurityError::InvalidHeader(name.to_string()))?;
        Ok(self)
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    fn token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        let raw = headers.get(&self.header_name)?.to_str().ok()?.trim();
        let token = match raw.get(..BEARER_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(BEARER_PREFIX) => raw[BEARER_PREFIX.len()..].trim(),
            _ => raw,
        };
        (!token.is_empty()).then_some(token)
    }
}

impl ContextRepository for HeaderContextRepository {
    fn load(&self, headers: &HeaderMap) -> SecurityContext {
        let Some(token) = self.token(headers) else {
            return SecurityContext::empty();
        };

        match self.provider.context_from_token(token) {
            Some(DecodedToken::Context(context)) => {
                tracing::debug!(
                    header = %self.header_name,
                    principal = ?context.principal().map(|p| p.id().as_str()),
                    "Obtained a valid security context from request header"
                );
                context
            }
            Some(DecodedToken::Foreign(claims)) => {
                tracing::warn!(
                    header = %self.header_name,
                    claims = %claims,
                    "Token did not contain a security context; treating request as anonymous"
                );
                SecurityContext::empty()
            }
            None => SecurityContext::empty(),
        }
    }

    fn save(&self, context: &SecurityContext, response: &mut Response) -> Result<(), SecurityError> {
        let Some(principal) = context.authenticated_principal() else {
            return Ok(());
        };
        if principal.id().is_empty() {
            return Err(SecurityError::MissingIdentityKey);
        }

        let token = self.provider.generate_token(principal.id())?;
        let value = HeaderValue::from_str(&token)
            .map_err(|_| SecurityError::InvalidHeader(self.header_name.to_string()))?;
        response.headers_mut().insert(self.header_name.clone(), value);

        tracing::debug!(
            principal = %principal.id(),
            header = %self.header_name,
            "Security context stored to response header"
        );
        Ok(())
    }

    fn contains(&self, headers: &HeaderMap) -> bool {
        headers
            .get(&self.header_name)
            .map(|value| !value.is_empty())
            .unwrap_or(false)
    }
}

/// Establishes the request's security scope around the inner service.
///
/// The loaded principal is visible through [`SecurityContextHolder`] and as a
/// `Principal` request extension. After the inner service responds the
/// context is saved into the response and the slot is dropped.
pub async fn context_persistence_middleware(
    State(repository): State<Arc<dyn ContextRepository>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    SecurityContextHolder::scope(async move {
        let context = if repository.contains(request.headers()) {
            repository.load(request.headers())
        } else {
            SecurityContext::empty()
        };

        if let Some(principal) = context.authenticated_principal() {
            request.extensions_mut().insert(principal.clone());
        }
        if let Err(e) = SecurityContextHolder::set_context(context) {
            tracing::error!(error = %e, "Security context scope missing");
        }

        let mut response = next.run(request).await;

        let context = SecurityContextHolder::take();
        if let Err(e) = repository.save(&context, &mut response) {
            tracing::error!(error = %e, "Failed to persist security context");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Security context could not be saved").into_response();
        }
        response
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::principal::{IdentityKey, Principal};
    use crate::security::token::JwtTokenProvider;
    use serde_json::json;
    use std::time::Duration;

    fn repository() -> HeaderContextRepository {
        let provider = JwtTokenProvider::new(b"repo-secret", "request-guard", Duration::from_secs(600));
        HeaderContextRepository::new(Arc::new(provider))
    }

    /// Answers every token with a fixed decode result.
    struct FixedProvider(Option<DecodedToken>);

    impl TokenProvider for FixedProvider {
        fn context_from_token(&self, _token: &str) -> Option<DecodedToken> {
            self.0.clone()
        }

        fn generate_token(&self, key: &IdentityKey) -> Result<String, SecurityError> {
            Ok(format!("token-for-{}", key))
        }
    }

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn test_missing_or_empty_header_is_anonymous() {
        let repository = repository();
        let empty = HeaderMap::new();
        assert!(!repository.contains(&empty));
        assert!(repository.load(&empty).is_anonymous());

        let blank = headers_with("authorization", "");
        assert!(!repository.contains(&blank));
        assert!(repository.load(&blank).is_anonymous());

        let bare_prefix = headers_with("authorization", "Bearer ");
        assert!(repository.load(&bare_prefix).is_anonymous());
    }

    #[test]
    fn test_invalid_token_is_anonymous() {
        let repository = repository();
        let headers = headers_with("authorization", "not-a-token");
        assert!(repository.contains(&headers));
        assert!(repository.load(&headers).is_anonymous());
    }

    #[test]
    fn test_foreign_payload_is_anonymous() {
        let repository = HeaderContextRepository::new(Arc::new(FixedProvider(Some(
            DecodedToken::Foreign(json!({"kind": "session"})),
        ))));
        let headers = headers_with("authorization", "anything");
        assert!(repository.load(&headers).is_anonymous());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let repository = repository();
        let context = SecurityContext::authenticated(Principal::builder("u1").build());

        let mut response = Response::new(Body::empty());
        repository.save(&context, &mut response).unwrap();
        let token = response.headers().get(AUTHORIZATION).unwrap().to_str().unwrap().to_string();

        let raw = headers_with("authorization", &token);
        let loaded = repository.load(&raw);
        assert_eq!(loaded.authenticated_principal().unwrap().id().as_str(), "u1");

        let bearer = headers_with("authorization", &format!("Bearer {}", token));
        assert_eq!(repository.load(&bearer).principal().unwrap().id().as_str(), "u1");
    }

    #[test]
    fn test_save_skips_anonymous_contexts() {
        let repository = repository();
        let mut response = Response::new(Body::empty());

        repository.save(&SecurityContext::empty(), &mut response).unwrap();
        let guest = SecurityContext::anonymous(Principal::builder("guest").build());
        repository.save(&guest, &mut response).unwrap();

        assert!(response.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_save_without_identity_key_fails() {
        let repository = repository();
        let context = SecurityContext::authenticated(Principal::builder("").build());
        let mut response = Response::new(Body::empty());

        assert!(matches!(
            repository.save(&context, &mut response),
            Err(SecurityError::MissingIdentityKey)
        ));
    }

    #[test]
    fn test_custom_header_name() {
        let repository = HeaderContextRepository::new(Arc::new(FixedProvider(None)))
            .with_header_name("X-Auth-Token")
            .unwrap();
        let context = SecurityContext::authenticated(Principal::builder("u7").build());
        let mut response = Response::new(Body::empty());
        repository.save(&context, &mut response).unwrap();

        assert_eq!(response.headers().get("x-auth-token").unwrap(), "token-for-u7");
        assert!(HeaderContextRepository::new(Arc::new(FixedProvider(None)))
            .with_header_name("bad header")
            .is_err());
    }
}
