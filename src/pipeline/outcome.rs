//! Stage outcomes and terminal verdicts.

use axum::http::StatusCode;
use serde_json::{json, Value};

/// Categorical result of a terminated chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerdictStatus {
    Ok,
    BadRequest,
    Unauthorized,
    PayloadTooLarge,
    UnsupportedMediaType,
    TooManyRequests,
    InternalError,
}

impl VerdictStatus {
    pub fn status_code(self) -> StatusCode {
        match self {
            VerdictStatus::Ok => StatusCode::OK,
            VerdictStatus::BadRequest => StatusCode::BAD_REQUEST,
            VerdictStatus::Unauthorized => StatusCode::UNAUTHORIZED,
            VerdictStatus::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            VerdictStatus::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            VerdictStatus::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            VerdictStatus::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictStatus::Ok => "ok",
            VerdictStatus::BadRequest => "bad_request",
            VerdictStatus::Unauthorized => "unauthorized",
            VerdictStatus::PayloadTooLarge => "payload_too_large",
            VerdictStatus::UnsupportedMediaType => "unsupported_media_type",
            VerdictStatus::TooManyRequests => "too_many_requests",
            VerdictStatus::InternalError => "internal_error",
        }
    }
}

/// Terminal result of a request: a status plus a JSON body.
///
/// The body always carries a numeric `status_code` field matching `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    status: VerdictStatus,
    body: Value,
}

impl Verdict {
    /// Build a verdict, stamping `status_code` into object bodies.
    pub fn new(status: VerdictStatus, body: Value) -> Self {
        let mut body = match body {
            Value::Object(map) => Value::Object(map),
            other => json!({ "detail": other }),
        };
        body["status_code"] = json!(status.status_code().as_u16());
        Self { status, body }
    }

    /// Rejection with an `error` message.
    pub fn rejection(status: VerdictStatus, error: impl Into<String>) -> Self {
        Self::new(status, json!({ "error": error.into() }))
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::rejection(VerdictStatus::InternalError, error)
    }

    pub fn status(&self) -> VerdictStatus {
        self.status
    }

    pub fn status_code(&self) -> StatusCode {
        self.status.status_code()
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }
}

/// What a stage decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Hand the context to the next stage.
    Continue,
    /// Stop the chain with this verdict.
    Terminate(Verdict),
}

impl Outcome {
    pub fn reject(status: VerdictStatus, error: impl Into<String>) -> Self {
        Outcome::Terminate(Verdict::rejection(status, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_is_stamped() {
        let v = Verdict::rejection(VerdictStatus::TooManyRequests, "Too Many Requests");
        assert_eq!(v.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(v.body()["status_code"], json!(429));
        assert_eq!(v.body()["error"], json!("Too Many Requests"));
    }

    #[test]
    fn test_non_object_body_is_wrapped() {
        let v = Verdict::new(VerdictStatus::Ok, json!("done"));
        assert_eq!(v.body()["detail"], json!("done"));
        assert_eq!(v.body()["status_code"], json!(200));
    }
}
