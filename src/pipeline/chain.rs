//! The assembled chain and its entry point.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::pipeline::context::RequestContext;
use crate::pipeline::outcome::{Outcome, Verdict};
use crate::pipeline::stage::Stage;

/// Result of running a request through the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainResult {
    /// A stage produced a terminal verdict.
    Terminated(Verdict),
    /// Every stage continued; nobody produced a verdict.
    Completed,
    /// Cancelled at a stage boundary before the named stage ran.
    Cancelled { before_stage: &'static str },
}

/// Ordered, immutable sequence of stages.
///
/// Built once by the assembler and shared read-only (behind `Arc`) by all
/// concurrent requests. The forward link of each stage is its position.
#[derive(Debug)]
pub struct Chain {
    stages: Vec<Box<dyn Stage>>,
}

impl Chain {
    pub(crate) fn from_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in activation order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the context through every stage until one terminates.
    pub async fn handle(&self, ctx: &mut RequestContext) -> ChainResult {
        self.run(ctx, None).await
    }

    /// Like [`Chain::handle`], but stops at the next stage boundary once
    /// `cancel` fires. A stage already running always finishes.
    pub async fn handle_cancellable(
        &self,
        ctx: &mut RequestContext,
        cancel: &CancellationToken,
    ) -> ChainResult {
        self.run(ctx, Some(cancel)).await
    }

    async fn run(&self, ctx: &mut RequestContext, cancel: Option<&CancellationToken>) -> ChainResult {
        for stage in &self.stages {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                tracing::info!(
                    request_id = %ctx.request_id(),
                    stage = stage.name(),
                    "Request cancelled at stage boundary"
                );
                return ChainResult::Cancelled { before_stage: stage.name() };
            }

            match run_stage(stage.as_ref(), ctx).await {
                Outcome::Continue => continue,
                Outcome::Terminate(verdict) => {
                    if verdict.status_code().is_success() {
                        tracing::debug!(request_id = %ctx.request_id(), stage = stage.name(), "Chain completed by stage");
                    } else {
                        metrics::record_stage_rejection(stage.name(), verdict.status().as_str());
                    }
                    return ChainResult::Terminated(verdict);
                }
            }
        }
        ChainResult::Completed
    }
}

/// Run one stage, converting errors and panics into a 500 verdict.
async fn run_stage(stage: &dyn Stage, ctx: &mut RequestContext) -> Outcome {
    let request_id = ctx.request_id().to_string();
    match AssertUnwindSafe(stage.handle(ctx)).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::error!(request_id = %request_id, stage = stage.name(), error = %e, "Stage failed");
            Outcome::Terminate(Verdict::internal(format!("Stage {} failed", stage.name())))
        }
        Err(_) => {
            tracing::error!(request_id = %request_id, stage = stage.name(), "Stage panicked");
            Outcome::Terminate(Verdict::internal(format!("Stage {} failed", stage.name())))
        }
    }
}

/// Entry point: hand a fresh context to the chain and map the result.
///
/// No chain, a chain that completes without a verdict, or a request
/// cancelled at a stage boundary all map to 500. A chain that answers
/// success for an upload that could not be read reports the upload failure
/// instead.
pub async fn dispatch(
    chain: Option<&Chain>,
    mut ctx: RequestContext,
    cancel: &CancellationToken,
) -> Verdict {
    let start = Instant::now();
    let verdict = match chain {
        None => {
            tracing::error!(request_id = %ctx.request_id(), "Security chain not assembled");
            Verdict::internal("Security chain down")
        }
        Some(chain) => match chain.handle_cancellable(&mut ctx, cancel).await {
            ChainResult::Terminated(verdict) => match ctx.upload_failure() {
                Some(failure) if verdict.status_code().is_success() => {
                    Verdict::rejection(failure.status, failure.reason.clone())
                }
                _ => verdict,
            },
            ChainResult::Completed => {
                tracing::error!(request_id = %ctx.request_id(), "Chain completed without a result");
                Verdict::internal("No result")
            }
            ChainResult::Cancelled { before_stage } => {
                Verdict::internal(format!("Request cancelled before {}", before_stage))
            }
        },
    };

    tracing::info!(
        request_id = %ctx.request_id(),
        client = %ctx.client_identity(),
        status = verdict.status_code().as_u16(),
        "Request processed"
    );
    metrics::record_request(verdict.status_code().as_u16(), start);
    verdict
}
