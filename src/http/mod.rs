//! HTTP wiring for the guarded demo application.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, ambient layers, security layers)
//!     → directory.rs (form login, token principal lookup)
//!     → demo handlers (/hello, /admin, /limit)
//! ```

pub mod directory;
pub mod server;

pub use directory::UserDirectory;
pub use server::{GuardServer, ServerError};
