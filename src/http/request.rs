//! Inbound request → [`RequestContext`].
//!
//! # Responsibilities
//! - Read the multipart `file` part (bytes, filename, declared type)
//! - Capture the peer address as client identity
//! - Carry the request ID assigned by the request-id layer
//!
//! # Design Decisions
//! - Size is the number of bytes actually received, not a client header
//! - An unreadable upload still produces a context: the chain answers, so a
//!   missing token is 401 whatever the body looks like

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::http::{HeaderMap, StatusCode};
use thiserror::Error;

use crate::pipeline::{FileMetadata, RequestContext, UploadFailure, VerdictStatus};

/// Header set by the request-id layer.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Name of the multipart part holding the upload.
pub const FILE_FIELD: &str = "file";

/// The upload could not be read.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid multipart request: {0}")]
    Rejected(#[from] MultipartRejection),

    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("missing multipart field 'file'")]
    MissingFile,
}

impl UploadError {
    fn status(&self) -> VerdictStatus {
        let code = match self {
            UploadError::Rejected(e) => e.status(),
            UploadError::Multipart(e) => e.status(),
            UploadError::MissingFile => StatusCode::BAD_REQUEST,
        };
        if code == StatusCode::PAYLOAD_TOO_LARGE {
            VerdictStatus::PayloadTooLarge
        } else {
            VerdictStatus::BadRequest
        }
    }

    pub fn into_failure(self) -> UploadFailure {
        UploadFailure {
            status: self.status(),
            reason: self.to_string(),
        }
    }
}

/// Request ID from the headers, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

async fn read_file(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(FileMetadata, Bytes), UploadError> {
    let mut multipart = multipart?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let declared_content_type = field.content_type().unwrap_or_default().to_string();
        let payload = field.bytes().await?;

        let metadata = FileMetadata {
            filename,
            declared_content_type,
            size_bytes: payload.len() as u64,
        };
        return Ok((metadata, payload));
    }

    Err(UploadError::MissingFile)
}

/// Build the per-request context from a multipart upload.
///
/// Upload problems are recorded on the context, never answered here.
pub async fn context_from_upload(
    peer: SocketAddr,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> RequestContext {
    let request_id = request_id(&headers);
    let client = peer.ip().to_string();

    let ctx = match read_file(multipart).await {
        Ok((metadata, payload)) => RequestContext::new(client, headers, metadata, payload),
        Err(e) => {
            tracing::debug!(request_id = %request_id, client = %client, error = %e, "Upload unreadable");
            RequestContext::without_file(client, headers, e.into_failure())
        }
    };
    ctx.with_request_id(request_id)
}
