//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, or JSON by extension)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → security_chain handed to the chain assembler once at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; no hot reload, the chain is
//!   assembled exactly once
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::GatewayConfig;
pub use schema::LimitsConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::StageEntry;
