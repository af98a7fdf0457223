//! Adversarial-defense preprocessing followed by the (mock) model call.
//!
//! Terminal stage of the reference chain. The two responsibilities are kept
//! apart: [`sanitize`] rewrites the payload, [`MockModel`] produces the
//! prediction.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::pipeline::assembler::ChainError;
use crate::pipeline::registry::parse_params;
use crate::pipeline::{Outcome, RequestContext, Stage, StageError, Verdict, VerdictStatus};

const SANITIZED_PREFIX: &[u8] = b"SANITIZED_BYTES_";
const KEPT_PREFIX_LEN: usize = 10;

/// Preprocessing technique applied before inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizationMethod {
    Resize,
    SpatialSmoothing,
    JpegCompression,
}

impl SanitizationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SanitizationMethod::Resize => "resize",
            SanitizationMethod::SpatialSmoothing => "spatial_smoothing",
            SanitizationMethod::JpegCompression => "jpeg_compression",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SanitizationParams {
    #[serde(default = "default_method")]
    method: SanitizationMethod,
    #[serde(default = "default_latency_ms")]
    latency_ms: u64,
}

fn default_method() -> SanitizationMethod {
    SanitizationMethod::Resize
}

fn default_latency_ms() -> u64 {
    100
}

/// Simulated sanitizer: keeps a marker plus the first bytes of the original.
pub fn sanitize(_method: SanitizationMethod, payload: &[u8]) -> Bytes {
    let kept = &payload[..payload.len().min(KEPT_PREFIX_LEN)];
    let mut out = Vec::with_capacity(SANITIZED_PREFIX.len() + kept.len());
    out.extend_from_slice(SANITIZED_PREFIX);
    out.extend_from_slice(kept);
    Bytes::from(out)
}

/// Stand-in for the downstream inference service.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockModel;

impl MockModel {
    pub fn predict(&self, _payload: &[u8]) -> Value {
        json!({
            "class": "golden_retriever",
            "confidence": 0.98,
            "adversarial_defense": true,
        })
    }
}

/// Sanitizes the payload, marks the context safe, answers with a prediction.
#[derive(Debug)]
pub struct SanitizationStage {
    method: SanitizationMethod,
    latency: Duration,
    model: MockModel,
}

impl SanitizationStage {
    pub const NAME: &'static str = "sanitization";

    pub fn new(method: SanitizationMethod, latency: Duration) -> Self {
        Self {
            method,
            latency,
            model: MockModel,
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self, ChainError> {
        let params: SanitizationParams = parse_params(Self::NAME, params)?;
        Ok(Self::new(params.method, Duration::from_millis(params.latency_ms)))
    }
}

#[async_trait]
impl Stage for SanitizationStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Result<Outcome, StageError> {
        tracing::debug!(
            request_id = %ctx.request_id(),
            method = self.method.as_str(),
            "Running adversarial defense"
        );

        // Simulated compute; no lock is held here.
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let cleaned = sanitize(self.method, ctx.payload());
        ctx.replace_payload(cleaned);
        ctx.annotate("is_safe", true);
        ctx.annotate("sanitization_method", self.method.as_str());

        let prediction = self.model.predict(ctx.payload());
        Ok(Outcome::Terminate(Verdict::new(
            VerdictStatus::Ok,
            json!({ "status": "success", "prediction": prediction }),
        )))
    }
}
