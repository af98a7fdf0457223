//! Bearer-token authentication stage.
//!
//! Runs first in the reference chain so anonymous traffic is rejected before
//! any rate-limit bookkeeping or payload inspection.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;

use crate::pipeline::assembler::ChainError;
use crate::pipeline::registry::parse_params;
use crate::pipeline::{Outcome, RequestContext, Stage, StageError, VerdictStatus};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthParams {
    token_secret: String,
    #[serde(default = "default_header")]
    header: String,
}

/// Placeholder secret shipped in sample configs. Never accepted.
pub const PLACEHOLDER_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

fn default_header() -> String {
    "authorization".to_string()
}

/// Rejects requests whose credential header is not `Bearer <token_secret>`.
pub struct AuthenticationStage {
    header: String,
    expected: String,
}

impl AuthenticationStage {
    pub const NAME: &'static str = "authentication";

    pub fn new(token_secret: &str) -> Self {
        Self {
            header: default_header(),
            expected: format!("Bearer {}", token_secret),
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self, ChainError> {
        let params: AuthParams = parse_params(Self::NAME, params)?;
        if params.token_secret.is_empty() {
            return Err(ChainError::InvalidParameters {
                stage: Self::NAME.to_string(),
                reason: "token_secret must not be empty".to_string(),
            });
        }
        if params.token_secret == PLACEHOLDER_SECRET {
            return Err(ChainError::InvalidParameters {
                stage: Self::NAME.to_string(),
                reason: format!("token_secret is still the placeholder {:?}", PLACEHOLDER_SECRET),
            });
        }
        if axum::http::HeaderName::from_bytes(params.header.as_bytes()).is_err() {
            return Err(ChainError::InvalidParameters {
                stage: Self::NAME.to_string(),
                reason: format!("invalid header name {:?}", params.header),
            });
        }

        Ok(Self {
            header: params.header.to_ascii_lowercase(),
            expected: format!("Bearer {}", params.token_secret),
        })
    }

    fn is_valid(&self, presented: &str) -> bool {
        presented.as_bytes().ct_eq(self.expected.as_bytes()).into()
    }
}

// The expected token is a secret; keep it out of Debug output.
impl std::fmt::Debug for AuthenticationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationStage")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for AuthenticationStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Result<Outcome, StageError> {
        let authorized = ctx.header(&self.header).is_some_and(|token| self.is_valid(token));

        if !authorized {
            tracing::warn!(
                request_id = %ctx.request_id(),
                client = %ctx.client_identity(),
                "Invalid or missing token"
            );
            return Ok(Outcome::reject(
                VerdictStatus::Unauthorized,
                "Unauthorized: Invalid or missing token",
            ));
        }

        tracing::debug!(request_id = %ctx.request_id(), "Identity verified");
        Ok(Outcome::Continue)
    }
}
