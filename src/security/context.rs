//! Request-scoped security context.
//!
//! # Design Decisions
//! - The current context lives in a Tokio task-local slot, never a global
//! - A slot only exists inside [`SecurityContextHolder::scope`]; leaving the
//!   scope drops it, so cleanup happens on every exit path including panics
//! - Tasks spawned from a request do not inherit the slot

use std::cell::RefCell;
use std::future::Future;

use crate::security::error::SecurityError;
use crate::security::principal::Principal;

tokio::task_local! {
    static CURRENT: RefCell<SecurityContext>;
}

/// Zero or one principal plus an anonymous marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    principal: Option<Principal>,
    anonymous: bool,
}

impl SecurityContext {
    /// A fresh context with no identity.
    pub fn empty() -> Self {
        Self {
            principal: None,
            anonymous: true,
        }
    }

    pub fn authenticated(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            anonymous: false,
        }
    }

    /// A context carrying a guest identity that must never be persisted.
    pub fn anonymous(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            anonymous: true,
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous || self.principal.is_none()
    }

    /// The principal, unless the context is anonymous.
    pub fn authenticated_principal(&self) -> Option<&Principal> {
        if self.anonymous {
            None
        } else {
            self.principal.as_ref()
        }
    }
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::empty()
    }
}

/// Access point for the current request's [`SecurityContext`].
pub struct SecurityContextHolder;

impl SecurityContextHolder {
    /// Run `future` with its own empty security context.
    pub async fn scope<F: Future>(future: F) -> F::Output {
        CURRENT
            .scope(RefCell::new(SecurityContext::empty()), future)
            .await
    }

    /// Synchronous variant of [`SecurityContextHolder::scope`].
    pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(RefCell::new(SecurityContext::empty()), f)
    }

    pub fn in_scope() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }

    /// Install `principal` as the authenticated identity of this request.
    pub fn set(principal: Principal) -> Result<(), SecurityError> {
        Self::set_context(SecurityContext::authenticated(principal))
    }

    pub fn set_context(context: SecurityContext) -> Result<(), SecurityError> {
        CURRENT
            .try_with(|slot| {
                *slot.borrow_mut() = context;
            })
            .map_err(|_| SecurityError::NoActiveScope)
    }

    /// Reset the slot to an empty context. No-op outside a scope.
    pub fn clear() {
        let _ = CURRENT.try_with(|slot| {
            *slot.borrow_mut() = SecurityContext::empty();
        });
    }

    /// Current principal, if any. Anonymous principals are returned too.
    pub fn get() -> Option<Principal> {
        CURRENT
            .try_with(|slot| slot.borrow().principal().cloned())
            .ok()
            .flatten()
    }

    pub fn context() -> SecurityContext {
        CURRENT
            .try_with(|slot| slot.borrow().clone())
            .unwrap_or_default()
    }

    /// Read the current context and leave an empty one behind.
    pub fn take() -> SecurityContext {
        CURRENT
            .try_with(|slot| slot.replace(SecurityContext::empty()))
            .unwrap_or_default()
    }
}
