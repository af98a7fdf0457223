//! Adversarial Gateway (v1)
//!
//! An inbound gateway that protects an inference service with a
//! configurable Chain of Responsibility, built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                 ADVERSARIAL GATEWAY                   │
//!                         │                                                       │
//!    POST /predict        │  ┌─────────┐    ┌──────────┐    ┌────────────────┐   │
//!    ─────────────────────┼─▶│  http   │───▶│ request  │───▶│ pipeline       │   │
//!                         │  │ server  │    │ context  │    │ dispatch       │   │
//!                         │  └─────────┘    └──────────┘    └───────┬────────┘   │
//!                         │                                         │            │
//!                         │      ┌─────────────┬──────────────┬─────┴───────┐    │
//!                         │      ▼             ▼              ▼             ▼    │
//!                         │  ┌───────┐   ┌──────────┐   ┌──────────┐  ┌────────┐ │
//!                         │  │ auth  │──▶│rate_limit│──▶│validation│─▶│sanitize│ │
//!                         │  │  401  │   │   429    │   │ 400/415  │  │  200   │ │
//!                         │  └───────┘   └──────────┘   └──────────┘  └────────┘ │
//!                         │                                                       │
//!    JSON verdict         │  ┌─────────┐                                          │
//!    ◀────────────────────┼──│response │◀──── first terminal verdict              │
//!                         │  └─────────┘                                          │
//!                         │                                                       │
//!                         │  Cross-cutting: config, observability, lifecycle      │
//!                         └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use adversarial_gateway::config::schema::reference_chain;
use adversarial_gateway::config::{load_config, GatewayConfig};
use adversarial_gateway::lifecycle::startup;
use adversarial_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "adversarial-gateway")]
#[command(about = "Security gateway in front of an inference service", long_about = None)]
struct Cli {
    /// Path to the configuration file (TOML, or JSON by extension).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run without a config file: the reference chain with this bearer token.
    #[arg(long, conflicts_with = "config")]
    dev_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match (&cli.config, &cli.dev_token) {
        (Some(path), _) => load_config(path)?,
        (None, Some(token)) => GatewayConfig {
            security_chain: reference_chain(token),
            ..GatewayConfig::default()
        },
        (None, None) => return Err("no security chain configured: pass --config PATH or --dev-token TOKEN".into()),
    };

    logging::init_tracing(&config.observability);
    tracing::info!("adversarial-gateway v0.1.0 starting");

    match &cli.config {
        Some(path) => tracing::info!(path = %path.display(), "Configuration loaded"),
        None => tracing::warn!("No configuration file given, running the reference chain with --dev-token"),
    }
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        stages = config.security_chain.len(),
        "Configuration ready"
    );

    if let Err(e) = startup::run(config).await {
        tracing::error!(error = %e, "Gateway failed");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
