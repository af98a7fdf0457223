//! File validation stage: upload readable, then size, then declared media type.
//!
//! The declared content type comes from the client. By default it is taken
//! at face value; `sniff_content = true` additionally requires the payload's
//! leading bytes to match the declared type for formats with a known
//! signature.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::pipeline::assembler::ChainError;
use crate::pipeline::registry::parse_params;
use crate::pipeline::{Outcome, RequestContext, Stage, StageError, VerdictStatus};

const MB: u64 = 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidationParams {
    #[serde(default = "default_max_size_mb")]
    max_size_mb: u64,
    #[serde(default)]
    allowed_types: Vec<String>,
    #[serde(default)]
    sniff_content: bool,
}

fn default_max_size_mb() -> u64 {
    5
}

/// Rejects oversized files (400) and disallowed media types (415).
#[derive(Debug)]
pub struct ValidationStage {
    max_size_mb: u64,
    allowed_types: Vec<String>,
    sniff_content: bool,
}

impl ValidationStage {
    pub const NAME: &'static str = "validation";

    pub fn new(max_size_mb: u64, allowed_types: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            max_size_mb,
            allowed_types: allowed_types
                .into_iter()
                .map(|t| media_type_essence(t.as_ref()))
                .collect(),
            sniff_content: false,
        }
    }

    /// Also check payload signatures against the declared type.
    pub fn with_sniffing(mut self, enabled: bool) -> Self {
        self.sniff_content = enabled;
        self
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self, ChainError> {
        let params: ValidationParams = parse_params(Self::NAME, params)?;
        if params.allowed_types.is_empty() {
            tracing::warn!("validation stage has an empty allowed_types list; every upload will be rejected");
        }
        Ok(Self::new(params.max_size_mb, params.allowed_types).with_sniffing(params.sniff_content))
    }

    fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(MB)
    }

    fn is_allowed(&self, essence: &str) -> bool {
        self.allowed_types.iter().any(|t| t == essence)
    }
}

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Result<Outcome, StageError> {
        if let Some(failure) = ctx.upload_failure() {
            tracing::warn!(request_id = %ctx.request_id(), reason = %failure.reason, "Upload unreadable");
            return Ok(Outcome::reject(failure.status, failure.reason.clone()));
        }

        let meta = ctx.file_metadata();

        if meta.size_bytes > self.max_size_bytes() {
            tracing::warn!(request_id = %ctx.request_id(), size_bytes = meta.size_bytes, "File too large");
            return Ok(Outcome::reject(
                VerdictStatus::BadRequest,
                format!("File exceeds {}MB limit", self.max_size_mb),
            ));
        }

        let essence = media_type_essence(&meta.declared_content_type);
        if !self.is_allowed(&essence) {
            tracing::warn!(
                request_id = %ctx.request_id(),
                content_type = %meta.declared_content_type,
                "Media type not allowed"
            );
            return Ok(Outcome::reject(
                VerdictStatus::UnsupportedMediaType,
                format!("Unsupported media type: {}", meta.declared_content_type),
            ));
        }

        if self.sniff_content && !signature_matches(&essence, ctx.payload()) {
            tracing::warn!(
                request_id = %ctx.request_id(),
                content_type = %essence,
                "Payload does not match declared media type"
            );
            return Ok(Outcome::reject(
                VerdictStatus::UnsupportedMediaType,
                format!("Content does not match declared type: {}", essence),
            ));
        }

        tracing::debug!(request_id = %ctx.request_id(), "File integrity OK");
        Ok(Outcome::Continue)
    }
}

/// `"Image/JPEG; q=1"` → `"image/jpeg"`.
fn media_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// True when the payload starts with the magic bytes of `essence`, or when
/// no signature is known for it.
fn signature_matches(essence: &str, payload: &[u8]) -> bool {
    match essence {
        "image/jpeg" => payload.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/png" => payload.starts_with(b"\x89PNG\r\n\x1a\n"),
        "image/gif" => payload.starts_with(b"GIF87a") || payload.starts_with(b"GIF89a"),
        "image/webp" => payload.len() >= 12 && &payload[..4] == b"RIFF" && &payload[8..12] == b"WEBP",
        "image/bmp" => payload.starts_with(b"BM"),
        _ => true,
    }
}
