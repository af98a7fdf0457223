//! Verdict → HTTP response.
//!
//! The verdict's `status_code` becomes the protocol status; the body is sent
//! as JSON unchanged.

use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::pipeline::Verdict;

impl IntoResponse for Verdict {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self.into_body())).into_response()
    }
}
