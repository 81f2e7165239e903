//! Authentication and security-context error types.

use thiserror::Error;

/// Which side of the failure taxonomy an [`AuthenticationError`] falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Bad or missing credentials, or an account that may not log in.
    Credentials,
    /// A handler fault unrelated to credential correctness.
    Internal,
}

/// Errors raised while authenticating a request.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Credentials were supplied but did not match.
    #[error("Bad credentials: {0}")]
    BadCredentials(String),

    /// A required credential field was absent.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Account expired")]
    AccountExpired,

    #[error("Account locked")]
    AccountLocked,

    #[error("Credentials expired")]
    CredentialsExpired,

    #[error("Account disabled")]
    Disabled,

    /// The handler itself failed (store unavailable, malformed body, ...).
    #[error("Internal authentication error: {0}")]
    Internal(String),
}

impl AuthenticationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AuthenticationError::Internal(_) => FailureKind::Internal,
            _ => FailureKind::Credentials,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind() == FailureKind::Internal
    }

    /// Stable machine-readable code used in failure response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthenticationError::BadCredentials(_) => "bad_credentials",
            AuthenticationError::MissingCredentials(_) => "missing_credentials",
            AuthenticationError::AccountExpired => "account_expired",
            AuthenticationError::AccountLocked => "account_locked",
            AuthenticationError::CredentialsExpired => "credentials_expired",
            AuthenticationError::Disabled => "account_disabled",
            AuthenticationError::Internal(_) => "internal_error",
        }
    }
}

/// Errors from the security-context machinery itself.
///
/// These are programming or configuration errors, not "no identity" outcomes.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// An authenticated principal carried an empty identity key.
    #[error("Authentication cannot find id")]
    MissingIdentityKey,

    #[error("Token encoding failed: {0}")]
    TokenEncoding(String),

    #[error("Invalid header {0}")]
    InvalidHeader(String),

    /// `set` was called outside of a request scope.
    #[error("No security context scope is active for this task")]
    NoActiveScope,
}
