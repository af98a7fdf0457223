//! Security stages.
//!
//! # Data Flow
//! ```text
//! Reference chain:
//!     → auth.rs (bearer token, 401)
//!     → rate_limit.rs (per-client trailing window, 429)
//!     → validation.rs (size 400, media type 415)
//!     → sanitization.rs (rewrite payload, mock inference, 200)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - Cheap checks first; order is configuration, not code

pub mod auth;
pub mod rate_limit;
pub mod sanitization;
pub mod validation;

pub use auth::AuthenticationStage;
pub use rate_limit::{RateLimitStage, SlidingWindowLimiter};
pub use sanitization::SanitizationStage;
pub use validation::ValidationStage;
