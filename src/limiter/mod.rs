//! Method-level rate limiting.
//!
//! # Data Flow
//! ```text
//! Invocation (target type, operation, arguments)
//!     → operation.rs (rules declared for the operation)
//!     → expression.rs (key per rule, parsed once and cached)
//!     → store.rs (try_acquire: remaining wait)
//!     → interceptor.rs (proceed, or hand the rejection to error.rs)
//! ```
//!
//! # Design Decisions
//! - Rules run in declaration order; the first rejection wins
//! - The store is the only point of mutual exclusion
//! - A limited call returns nothing; the error handler decides the rest

pub mod error;
pub mod expression;
pub mod interceptor;
pub mod operation;
pub mod store;

pub use error::{LimitExceeded, LimiterError, LimiterErrorHandler, LoggingErrorHandler};
pub use expression::{Expression, ExpressionCache};
pub use interceptor::{Admission, Invocation, Limited, LimiterInterceptor, LimiterInterceptorBuilder};
pub use operation::{LimiterOperation, LimiterOperationSource, StaticOperationSource};
pub use store::{FrequencyLimiter, MemoryFrequencyLimiter};
