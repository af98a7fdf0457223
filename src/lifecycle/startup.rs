//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Start the metrics exporter when enabled
//! - Assemble the security chain (exactly once)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, including an empty chain
//! - The listener binds last, so no traffic arrives without a chain

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::validation::{validate_config, ValidationError};
use crate::config::{ConfigError, GatewayConfig};
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::shutdown_signal;
use crate::observability::metrics;
use crate::pipeline::{Chain, ChainAssembler, ChainError};

/// Fatal startup failure.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("security chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl From<Vec<ValidationError>> for StartupError {
    fn from(errors: Vec<ValidationError>) -> Self {
        StartupError::Config(ConfigError::Validation(errors))
    }
}

/// Validate the config and assemble its chain with the built-in stages.
pub fn prepare(config: &GatewayConfig) -> Result<Arc<Chain>, StartupError> {
    validate_config(config)?;
    let chain = ChainAssembler::with_builtin().build(&config.security_chain)?;
    Ok(Arc::new(chain))
}

/// A bound, ready-to-serve gateway.
pub struct Gateway {
    server: HttpServer,
    listener: TcpListener,
}

impl Gateway {
    /// Assemble the chain, then bind. Nothing is bound if assembly fails.
    pub async fn bind(config: GatewayConfig) -> Result<Self, StartupError> {
        let chain = prepare(&config)?;

        if config.observability.metrics_enabled {
            if let Ok(addr) = config.observability.metrics_address.parse::<SocketAddr>() {
                metrics::init_metrics(addr);
            }
        }

        let address = config.listener.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;

        Ok(Self {
            server: HttpServer::new(config, chain),
            listener,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` is triggered.
    pub async fn serve(self, shutdown: &Shutdown) -> Result<(), StartupError> {
        self.server
            .run(self.listener, shutdown.subscribe())
            .await
            .map_err(StartupError::Serve)
    }
}

/// Full startup: bind, serve, stop on SIGINT/SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let gateway = Gateway::bind(config).await?;
    let address = gateway.local_addr().map_err(StartupError::Serve)?;
    tracing::info!(address = %address, "Listening for connections");

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    gateway.serve(&shutdown).await
}
