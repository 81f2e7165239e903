//! Bearer token boundary.
//!
//! # Responsibilities
//! - Turn an opaque bearer token back into a security context
//! - Mint a fresh token for an identity key
//!
//! # Design Decisions
//! - Tokens carry only the identity key (`sub`); authorities and account
//!   flags are re-read through a [`PrincipalResolver`] when one is set
//! - Any decode failure means "no identity", never an error
//! - HS256 with a shared secret; signing internals stay in `jsonwebtoken`

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::security::context::SecurityContext;
use crate::security::error::SecurityError;
use crate::security::principal::{IdentityKey, Principal};

/// What a token decoded into.
#[derive(Debug, Clone)]
pub enum DecodedToken {
    /// A usable security context.
    Context(SecurityContext),
    /// A validly signed token whose payload is not a security context.
    Foreign(Value),
}

/// Translates between bearer tokens and security contexts.
pub trait TokenProvider: Send + Sync {
    /// `None` when the token is missing, malformed, expired or unknown.
    fn context_from_token(&self, token: &str) -> Option<DecodedToken>;

    fn generate_token(&self, key: &IdentityKey) -> Result<String, SecurityError>;
}

/// Looks up the current state of a principal by identity key.
pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, key: &IdentityKey) -> Option<Principal>;
}

/// Claims written into every issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub iss: String,
    pub jti: String,
}

/// Self-contained signed tokens (JWT, HS256).
pub struct JwtTokenProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
    resolver: Option<Arc<dyn PrincipalResolver>>,
}

impl JwtTokenProvider {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
            resolver: None,
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            config.issuer.clone(),
            Duration::from_secs(config.token_ttl_secs),
        )
    }

    /// Reload full principals by key instead of trusting the token alone.
    pub fn with_resolver(mut self, resolver: Arc<dyn PrincipalResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation
    }
}

impl TokenProvider for JwtTokenProvider {
    fn context_from_token(&self, token: &str) -> Option<DecodedToken> {
        let data = match jsonwebtoken::decode::<Value>(token, &self.decoding_key, &self.validation()) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(error = %e, "Bearer token rejected");
                return None;
            }
        };

        let Some(sub) = data.claims.get("sub").and_then(Value::as_str) else {
            return Some(DecodedToken::Foreign(data.claims));
        };
        let key = IdentityKey::new(sub);

        let principal = match &self.resolver {
            Some(resolver) => match resolver.resolve(&key) {
                Some(principal) => principal,
                None => {
                    tracing::debug!(subject = %key, "Token subject no longer resolves");
                    return None;
                }
            },
            None => Principal::builder(key).build(),
        };

        if let Err(e) = principal.check_status() {
            tracing::debug!(subject = %principal.id(), error = %e, "Token subject may no longer authenticate");
            return None;
        }

        Some(DecodedToken::Context(SecurityContext::authenticated(principal)))
    }

    fn generate_token(&self, key: &IdentityKey) -> Result<String, SecurityError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let claims = TokenClaims {
            sub: key.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl.as_secs()),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SecurityError::TokenEncoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &[u8] = b"test-secret";

    fn provider() -> JwtTokenProvider {
        JwtTokenProvider::new(SECRET, "request-guard", Duration::from_secs(600))
    }

    fn context_of(decoded: Option<DecodedToken>) -> SecurityContext {
        match decoded {
            Some(DecodedToken::Context(context)) => context,
            other => panic!("expected a context, got {:?}", other),
        }
    }

    struct Directory(HashMap<String, Principal>);

    impl PrincipalResolver for Directory {
        fn resolve(&self, key: &IdentityKey) -> Option<Principal> {
            self.0.get(key.as_str()).cloned()
        }
    }

    #[test]
    fn test_round_trip() {
        let provider = provider();
        let token = provider.generate_token(&IdentityKey::new("u1")).unwrap();

        let context = context_of(provider.context_from_token(&token));
        assert_eq!(context.authenticated_principal().unwrap().id().as_str(), "u1");
    }

    #[test]
    fn test_resolver_supplies_authorities() {
        let mut users = HashMap::new();
        users.insert(
            "u1".to_string(),
            Principal::builder("u1").authority("ROLE_user").build(),
        );
        let provider = provider().with_resolver(Arc::new(Directory(users)));

        let token = provider.generate_token(&IdentityKey::new("u1")).unwrap();
        let context = context_of(provider.context_from_token(&token));
        assert!(context.principal().unwrap().has_authority("ROLE_user"));

        let unknown = provider.generate_token(&IdentityKey::new("ghost")).unwrap();
        assert!(provider.context_from_token(&unknown).is_none());
    }

    #[test]
    fn test_locked_or_disabled_subject_is_not_accepted() {
        let mut users = HashMap::new();
        users.insert(
            "u1".to_string(),
            Principal::builder("u1").authority("ROLE_user").account_non_locked(false).build(),
        );
        users.insert("u2".to_string(), Principal::builder("u2").enabled(false).build());
        let provider = provider().with_resolver(Arc::new(Directory(users)));

        let locked = provider.generate_token(&IdentityKey::new("u1")).unwrap();
        assert!(provider.context_from_token(&locked).is_none());

        let disabled = provider.generate_token(&IdentityKey::new("u2")).unwrap();
        assert!(provider.context_from_token(&disabled).is_none());
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let provider = JwtTokenProvider::new(SECRET, "request-guard", Duration::from_secs(u64::MAX));
        let token = provider.generate_token(&IdentityKey::new("u1")).unwrap();
        let context = context_of(provider.context_from_token(&token));
        assert!(context.authenticated_principal().is_some());
    }

    #[test]
    fn test_rejects_garbage_and_foreign_signatures() {
        let provider = provider();
        assert!(provider.context_from_token("").is_none());
        assert!(provider.context_from_token("invalid.jwt.token").is_none());

        let other = JwtTokenProvider::new(b"other-secret", "request-guard", Duration::from_secs(600));
        let token = other.generate_token(&IdentityKey::new("u1")).unwrap();
        assert!(provider.context_from_token(&token).is_none());
    }

    #[test]
    fn test_rejects_expired_token() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let claims = TokenClaims {
            sub: "u1".into(),
            iat: now - 7200,
            exp: now - 3600,
            iss: "request-guard".into(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert!(provider().context_from_token(&token).is_none());
    }

    #[test]
    fn test_token_without_subject_is_foreign() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let claims = serde_json::json!({
            "exp": now + 600,
            "iss": "request-guard",
            "session": "abc",
        });
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        match provider().context_from_token(&token) {
            Some(DecodedToken::Foreign(value)) => assert_eq!(value["session"], "abc"),
            other => panic!("expected foreign payload, got {:?}", other),
        }
    }
}
