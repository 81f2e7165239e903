//! In-memory user directory and form login.
//!
//! Users come from `[[security.users]]`. The directory both authenticates
//! `username`/`password` forms and resolves identity keys back to principals
//! when a bearer token is loaded, so authority changes take effect on the
//! next request.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Form, FromRequest},
    http::{request::Parts, Request},
};
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::UserConfig;
use crate::security::dispatcher::{Attempt, AuthHandler};
use crate::security::error::AuthenticationError;
use crate::security::principal::{IdentityKey, Principal};
use crate::security::token::PrincipalResolver;

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserConfig>,
    /// username → id
    usernames: HashMap<String, String>,
}

impl UserDirectory {
    pub fn new(users: &[UserConfig]) -> Self {
        let mut directory = Self::default();
        for user in users {
            directory.usernames.insert(user.username.clone(), user.id.clone());
            directory.users.insert(user.id.clone(), user.clone());
        }
        directory
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Check a username/password pair.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Principal, AuthenticationError> {
        let user = self
            .usernames
            .get(username)
            .and_then(|id| self.users.get(id))
            .filter(|user| user.password == password)
            .ok_or_else(|| AuthenticationError::BadCredentials("username or password".into()))?;
        Ok(to_principal(user))
    }
}

fn to_principal(user: &UserConfig) -> Principal {
    Principal::builder(user.id.as_str())
        .authorities(user.authorities.iter().cloned())
        .account_non_expired(user.account_non_expired)
        .account_non_locked(user.account_non_locked)
        .credentials_non_expired(user.credentials_non_expired)
        .enabled(user.enabled)
        .build()
}

impl PrincipalResolver for UserDirectory {
    fn resolve(&self, id: &IdentityKey) -> Option<Principal> {
        self.users.get(id.as_str()).map(to_principal)
    }
}

#[async_trait]
impl AuthHandler for UserDirectory {
    async fn attempt(&self, parts: &Parts, body: Body) -> Result<Attempt, AuthenticationError> {
        let request = Request::from_parts(parts.clone(), body);

        let Form(form) = Form::<LoginForm>::from_request(request, &())
            .await
            .map_err(|rejection| AuthenticationError::MissingCredentials(rejection.body_text()))?;

        match (form.username, form.password) {
            (Some(username), Some(password)) => {
                tracing::debug!(username = %username, "Form login attempt");
                self.authenticate(&username, &password).map(Attempt::Authenticated)
            }
            _ => Err(AuthenticationError::MissingCredentials("username and password are required".into())),
        }
    }
}
