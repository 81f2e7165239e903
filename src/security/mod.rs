//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → repository.rs (scope opened, bearer token → context)
//!     → dispatcher.rs (login paths: handler → principal → holder)
//!     → application handlers (CurrentPrincipal extractor)
//! Outgoing response:
//!     → repository.rs (renewed token written, scope closed)
//! ```
//!
//! # Design Decisions
//! - Identity is request-scoped; nothing is shared between requests
//! - "No identity" is an anonymous context, not an error
//! - Misconfiguration fails loudly

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod extract;
pub mod principal;
pub mod repository;
pub mod token;

pub use context::{SecurityContext, SecurityContextHolder};
pub use dispatcher::{Attempt, AuthDispatcher, AuthHandler, FailureHandler, Registration, SuccessHandler};
pub use error::{AuthenticationError, FailureKind, SecurityError};
pub use extract::CurrentPrincipal;
pub use principal::{IdentityKey, Principal};
pub use repository::{ContextRepository, HeaderContextRepository};
pub use token::{DecodedToken, JwtTokenProvider, PrincipalResolver, TokenProvider};
