//! Shared helpers for gateway integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use adversarial_gateway::config::schema::reference_chain;
use adversarial_gateway::config::StageEntry;
use adversarial_gateway::lifecycle::Gateway;
use adversarial_gateway::{GatewayConfig, Shutdown};
use reqwest::multipart::{Form, Part};
use serde_json::json;

pub const TOKEN: &str = "integration-secret";

/// A running gateway on an ephemeral port. Dropping it stops the server.
pub struct TestGateway {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Reference chain bound to 127.0.0.1:0 with no artificial sanitization latency.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig {
        security_chain: reference_chain(TOKEN),
        ..GatewayConfig::default()
    };
    config.listener.bind_address = "127.0.0.1:0".into();
    for entry in &mut config.security_chain {
        if entry.name == "sanitization" {
            entry.parameters.insert("latency_ms".into(), json!(0));
        }
    }
    config
}

/// Replace the parameters of the named stage.
pub fn set_stage(config: &mut GatewayConfig, name: &str, parameters: serde_json::Value) {
    let entry = StageEntry::new(name, parameters);
    if let Some(slot) = config.security_chain.iter_mut().find(|e| e.name == name) {
        *slot = entry;
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let gateway = Gateway::bind(config).await.expect("gateway should start");
    let addr = gateway.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let serve = shutdown.clone();
    tokio::spawn(async move {
        let _ = gateway.serve(&serve).await;
    });
    TestGateway { addr, shutdown }
}

/// A fake JPEG: SOI marker followed by zeros.
pub fn dummy_image() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8];
    bytes.extend(std::iter::repeat(0u8).take(1000));
    bytes
}

pub fn upload(data: Vec<u8>, mime: &str) -> Form {
    let part = Part::bytes(data).file_name("test_img.jpg").mime_str(mime).unwrap();
    Form::new().part("file", part)
}

pub async fn predict(
    client: &reqwest::Client,
    gateway: &TestGateway,
    token: Option<&str>,
    form: Form,
) -> (u16, serde_json::Value) {
    let mut request = client.post(gateway.url("/predict")).multipart(form);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.unwrap();
    let status = response.status().as_u16();
    let body = response.json().await.unwrap_or(serde_json::Value::Null);
    (status, body)
}
