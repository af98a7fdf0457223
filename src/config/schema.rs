//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Transport-level size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Ordered security chain. Order is activation order.
    ///
    /// Empty when absent from the file; startup then fails, since the
    /// gateway never serves without a chain.
    pub security_chain: Vec<StageEntry>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            observability: ObservabilityConfig::default(),
            security_chain: Vec::new(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Maximum concurrently processed requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            max_connections: 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Transport limits applied while the upload is read.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    ///
    /// Keep this above the validation stage's `max_size_mb`, otherwise
    /// oversized uploads are reported as 413 instead of the stage's 400.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// One entry of the security chain.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StageEntry {
    /// Registry name of the stage (e.g. "rate_limit").
    pub name: String,

    /// Disabled entries are left out of the chain entirely.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Stage-specific parameters, handed to the stage factory as-is.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl StageEntry {
    /// Enabled entry with the given parameters.
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        let parameters = match parameters {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            enabled: true,
            parameters,
        }
    }

    /// Same entry with `enabled = false`.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

fn default_enabled() -> bool {
    true
}

/// Reference chain: Authentication → RateLimit → Validation → Sanitization.
pub fn reference_chain(token_secret: &str) -> Vec<StageEntry> {
    vec![
        StageEntry::new("authentication", json!({ "token_secret": token_secret })),
        StageEntry::new("rate_limit", json!({ "limit": 5, "window_seconds": 60 })),
        StageEntry::new(
            "validation",
            json!({ "max_size_mb": 5, "allowed_types": ["image/jpeg", "image/png"] }),
        ),
        StageEntry::new("sanitization", json!({ "method": "resize" })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_chain_parsing() {
        let raw = r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [[security_chain]]
            name = "authentication"
            parameters = { token_secret = "s3cret" }

            [[security_chain]]
            name = "rate_limit"
            enabled = false
            parameters = { limit = 10, window_seconds = 30 }
        "#;

        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.listener.max_connections, 1024);
        assert_eq!(config.security_chain.len(), 2);
        assert!(config.security_chain[0].enabled);
        assert!(!config.security_chain[1].enabled);
        assert_eq!(config.security_chain[1].parameters["limit"], json!(10));
    }

    #[test]
    fn test_reference_chain_order() {
        let chain = reference_chain("s3cret");
        let names: Vec<_> = chain.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["authentication", "rate_limit", "validation", "sanitization"]);
        assert_eq!(chain[0].parameters["token_secret"], json!("s3cret"));
    }

    #[test]
    fn test_missing_chain_is_not_filled_in() {
        let raw = r#"
            [listener]
            bind_address = "127.0.0.1:9000"
        "#;

        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert!(config.security_chain.is_empty());
        assert!(GatewayConfig::default().security_chain.is_empty());
    }
}
