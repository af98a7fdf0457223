//! Security pipeline subsystem (Chain of Responsibility).
//!
//! # Data Flow
//! ```text
//! Startup:
//!     security_chain entries (config)
//!     → assembler.rs (skip disabled, resolve via registry.rs, inject params)
//!     → Chain (ordered, immutable, shared via Arc)
//!
//! Per request:
//!     transport builds RequestContext (context.rs)
//!     → chain.rs dispatch()
//!     → stage 1 → stage 2 → ... (each: Continue or Terminate)
//!     → Verdict (outcome.rs) → transport response
//! ```
//!
//! # Design Decisions
//! - Stages are resolved by registry name, never by naming convention
//! - A failing entry aborts assembly; partial chains are never built
//! - Stage errors and panics are contained at the stage boundary (500)
//! - Only the rate limiter keeps state beyond one request

pub mod assembler;
pub mod chain;
pub mod context;
pub mod outcome;
pub mod registry;
pub mod stage;

pub use assembler::{ChainAssembler, ChainError};
pub use chain::{dispatch, Chain, ChainResult};
pub use context::{FileMetadata, RequestContext, UploadFailure};
pub use outcome::{Outcome, Verdict, VerdictStatus};
pub use registry::{StageFactory, StageRegistry};
pub use stage::{Stage, StageError};
