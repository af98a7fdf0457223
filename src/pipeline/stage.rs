//! The stage contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::context::RequestContext;
use crate::pipeline::outcome::Outcome;

/// Unexpected failure inside a stage.
///
/// Expected rejections are [`Outcome::Terminate`] values, not errors. A
/// `StageError` is turned into a 500 verdict at the chain boundary.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StageError {
    message: String,
}

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One link of the security chain.
///
/// Implementations hold only configuration injected at construction, plus
/// whatever shared state they own (see the rate limiter). They must not hold
/// a lock across an `.await`.
#[async_trait]
pub trait Stage: Send + Sync + std::fmt::Debug {
    /// Registry name of this stage.
    fn name(&self) -> &'static str;

    /// Inspect and possibly mutate the context, then continue or terminate.
    async fn handle(&self, ctx: &mut RequestContext) -> Result<Outcome, StageError>;
}
