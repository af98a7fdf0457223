//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the prediction and health handlers
//! - Wire up middleware (tracing, body limit, timeout, request ID, concurrency)
//! - Build one context per request and dispatch it to the chain
//! - Serve until the shutdown signal fires; requests still in the chain stop
//!   at the next stage boundary

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, ConnectInfo, DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::request::context_from_upload;
use crate::pipeline::{dispatch, Chain, Verdict};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// `None` only if the gateway was started without a chain.
    pub chain: Option<Arc<Chain>>,
    /// Cancelled on shutdown.
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(chain: Option<Arc<Chain>>) -> Self {
        Self {
            chain,
            cancel: CancellationToken::new(),
        }
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new HTTP server around an assembled chain.
    pub fn new(config: GatewayConfig, chain: Arc<Chain>) -> Self {
        Self::with_state(config, AppState::new(Some(chain)))
    }

    /// Create a server from explicit state (a missing chain answers 500).
    pub fn with_state(config: GatewayConfig, state: AppState) -> Self {
        let cancel = state.cancel.clone();
        let router = Self::build_router(&config, state);
        Self { router, config, cancel }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/predict", post(predict_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            // Enforced while reading the upload, so the chain still answers.
            .layer(DefaultBodyLimit::max(config.limits.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(middleware::from_fn_with_state(
                Arc::new(Semaphore::new(config.listener.max_connections)),
                concurrency_limit,
            ))
    }

    /// The router, for callers that serve it themselves.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_in_flight = self.config.listener.max_connections,
            body_limit = self.config.limits.max_body_bytes,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let cancel = self.cancel;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
                cancel.cancel();
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Bound the number of requests in flight; excess requests wait for a slot.
async fn concurrency_limit(
    State(slots): State<Arc<Semaphore>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // The semaphore is never closed.
    let Ok(_permit) = slots.acquire_owned().await else {
        return Verdict::internal("Server shutting down").into_response();
    };
    next.run(request).await
}

/// Pipeline entry point: one context per request, one dispatch.
async fn predict_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let ctx = context_from_upload(peer, headers, multipart).await;

    tracing::debug!(
        request_id = %ctx.request_id(),
        client = %ctx.client_identity(),
        filename = %ctx.file_metadata().filename,
        size_bytes = ctx.file_metadata().size_bytes,
        "Dispatching request to security chain"
    );

    dispatch(state.chain.as_deref(), ctx, &state.cancel).await.into_response()
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let stages = state
        .chain
        .as_ref()
        .map(|c| c.stage_names())
        .unwrap_or_default();
    Json(json!({ "status": "ok", "stages": stages })).into_response()
}
