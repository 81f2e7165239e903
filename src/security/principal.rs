//! Authenticated identity records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::security::error::AuthenticationError;

/// Opaque identity key, the only part of a principal carried in tokens.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for IdentityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Immutable description of an authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    id: IdentityKey,
    authorities: BTreeSet<String>,
    account_non_expired: bool,
    account_non_locked: bool,
    credentials_non_expired: bool,
    enabled: bool,
}

impl Principal {
    /// Start building a principal; every status flag defaults to "ok".
    pub fn builder(id: impl Into<IdentityKey>) -> PrincipalBuilder {
        PrincipalBuilder {
            id: id.into(),
            authorities: BTreeSet::new(),
            account_non_expired: true,
            account_non_locked: true,
            credentials_non_expired: true,
            enabled: true,
        }
    }

    pub fn id(&self) -> &IdentityKey {
        &self.id
    }

    pub fn authorities(&self) -> impl Iterator<Item = &str> {
        self.authorities.iter().map(String::as_str)
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }

    pub fn is_account_non_expired(&self) -> bool {
        self.account_non_expired
    }

    pub fn is_account_non_locked(&self) -> bool {
        self.account_non_locked
    }

    pub fn is_credentials_non_expired(&self) -> bool {
        self.credentials_non_expired
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reject principals whose account state forbids logging in.
    ///
    /// Checked in the order locked, disabled, expired, credentials expired.
    pub fn check_status(&self) -> Result<(), AuthenticationError> {
        if !self.account_non_locked {
            return Err(AuthenticationError::AccountLocked);
        }
        if !self.enabled {
            return Err(AuthenticationError::Disabled);
        }
        if !self.account_non_expired {
            return Err(AuthenticationError::AccountExpired);
        }
        if !self.credentials_non_expired {
            return Err(AuthenticationError::CredentialsExpired);
        }
        Ok(())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.id)?;
        for (i, authority) in self.authorities.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", authority)?;
        }
        write!(f, "]")
    }
}

/// Builder for [`Principal`].
#[derive(Debug, Clone)]
pub struct PrincipalBuilder {
    id: IdentityKey,
    authorities: BTreeSet<String>,
    account_non_expired: bool,
    account_non_locked: bool,
    credentials_non_expired: bool,
    enabled: bool,
}

impl PrincipalBuilder {
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.insert(authority.into());
        self
    }

    pub fn authorities<I, S>(mut self, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorities.extend(authorities.into_iter().map(Into::into));
        self
    }

    pub fn account_non_expired(mut self, value: bool) -> Self {
        self.account_non_expired = value;
        self
    }

    pub fn account_non_locked(mut self, value: bool) -> Self {
        self.account_non_locked = value;
        self
    }

    pub fn credentials_non_expired(mut self, value: bool) -> Self {
        self.credentials_non_expired = value;
        self
    }

    pub fn enabled(mut self, value: bool) -> Self {
        self.enabled = value;
        self
    }

    pub fn build(self) -> Principal {
        Principal {
            id: self.id,
            authorities: self.authorities,
            account_non_expired: self.account_non_expired,
            account_non_locked: self.account_non_locked,
            credentials_non_expired: self.credentials_non_expired,
            enabled: self.enabled,
        }
    }
}
