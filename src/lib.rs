//! Adversarial Gateway Library
//!
//! Runs every inbound inference request through a configurable chain of
//! security stages (authentication, rate limiting, validation, sanitization)
//! before the mocked model answers.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod security;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Chain, ChainAssembler, RequestContext, StageRegistry};
