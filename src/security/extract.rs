//! Axum extractor for the authenticated principal.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::security::context::SecurityContextHolder;
use crate::security::principal::Principal;

/// The request's authenticated principal; rejects with `401` when absent.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

impl CurrentPrincipal {
    /// `403` unless the principal holds `authority`.
    pub fn require(&self, authority: &str) -> Result<&Principal, (StatusCode, &'static str)> {
        if self.0.has_authority(authority) {
            Ok(&self.0)
        } else {
            Err((StatusCode::FORBIDDEN, "Access denied"))
        }
    }
}

impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(Self(principal.clone()));
        }

        let context = SecurityContextHolder::context();
        context
            .authenticated_principal()
            .cloned()
            .map(Self)
            .ok_or((StatusCode::UNAUTHORIZED, "Authentication required"))
    }
}
