//! Per-request context carried through the chain.
//!
//! Identity, headers and file metadata are fixed at construction. Stages may
//! only replace the payload wholesale or add/overwrite annotations.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde_json::Value;

use crate::pipeline::outcome::VerdictStatus;

/// Metadata of the uploaded file as declared by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    pub filename: String,
    /// Content type as declared by the client, not sniffed.
    pub declared_content_type: String,
    pub size_bytes: u64,
}

/// The upload could not be read. Carried through the chain so that earlier
/// stages (authentication first of all) still answer before it is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub status: VerdictStatus,
    pub reason: String,
}

/// Mutable record for one request's traversal of the chain.
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    client_identity: String,
    headers: HeaderMap,
    file_metadata: FileMetadata,
    payload: Bytes,
    upload_failure: Option<UploadFailure>,
    annotations: HashMap<String, Value>,
}

impl RequestContext {
    /// Build a context. `file_metadata.size_bytes` is taken as given.
    pub fn new(
        client_identity: impl Into<String>,
        headers: HeaderMap,
        file_metadata: FileMetadata,
        payload: Bytes,
    ) -> Self {
        Self {
            request_id: "unknown".to_string(),
            client_identity: client_identity.into(),
            headers,
            file_metadata,
            payload,
            upload_failure: None,
            annotations: HashMap::new(),
        }
    }

    /// Context for a request whose file could not be read.
    pub fn without_file(
        client_identity: impl Into<String>,
        headers: HeaderMap,
        failure: UploadFailure,
    ) -> Self {
        let mut ctx = Self::new(client_identity, headers, FileMetadata::default(), Bytes::new());
        ctx.upload_failure = Some(failure);
        ctx
    }

    /// Attach the transport's request ID for log correlation.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn client_identity(&self) -> &str {
        &self.client_identity
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn file_metadata(&self) -> &FileMetadata {
        &self.file_metadata
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn upload_failure(&self) -> Option<&UploadFailure> {
        self.upload_failure.as_ref()
    }

    /// Replace the payload as a whole.
    pub fn replace_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }

    pub fn annotations(&self) -> &HashMap<String, Value> {
        &self.annotations
    }

    /// Record a fact for later stages. Existing keys are overwritten.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.annotations.insert(key.into(), value.into());
    }
}
