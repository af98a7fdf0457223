//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (multipart upload → RequestContext)
//!     → pipeline::dispatch (security chain)
//!     → response.rs (Verdict → status + JSON)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{context_from_upload, UploadError, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
