//! Request-scoped security context and method-level rate limiting.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod limiter;
pub mod observability;
pub mod security;

pub use config::schema::GuardConfig;
pub use http::GuardServer;
pub use lifecycle::Shutdown;
