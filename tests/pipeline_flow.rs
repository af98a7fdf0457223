//! End-to-end tests: real listener, real HTTP client, full security chain.

mod common;

use common::{dummy_image, predict, set_stage, start_gateway, test_config, upload, TOKEN};
use reqwest::multipart::Form;
use serde_json::json;

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let gateway = start_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let (status, body) = predict(&client, &gateway, None, upload(dummy_image(), "image/jpeg")).await;
    assert_eq!(status, 401);
    assert_eq!(
        body,
        json!({ "error": "Unauthorized: Invalid or missing token", "status_code": 401 })
    );

    let (status, _) = predict(&client, &gateway, Some("wrong"), upload(dummy_image(), "image/jpeg")).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_text_file_is_unsupported() {
    let gateway = start_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let bad = b"This is not an image, it is a malicious text file.".to_vec();
    let (status, body) = predict(&client, &gateway, Some(TOKEN), upload(bad, "text/plain")).await;
    assert_eq!(status, 415);
    assert_eq!(body["status_code"], 415);
}

#[tokio::test]
async fn test_legitimate_request_gets_prediction() {
    let gateway = start_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let (status, body) = predict(&client, &gateway, Some(TOKEN), upload(dummy_image(), "image/jpeg")).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "success");
    assert_eq!(body["prediction"]["class"], "golden_retriever");
    assert_eq!(body["prediction"]["adversarial_defense"], true);
}

#[tokio::test]
async fn test_sixth_rapid_request_is_limited() {
    let gateway = start_gateway(test_config()).await;
    let client = reqwest::Client::new();

    for i in 1..=5 {
        let (status, _) = predict(&client, &gateway, Some(TOKEN), upload(dummy_image(), "image/jpeg")).await;
        assert_eq!(status, 200, "request #{i} should pass");
    }

    let (status, body) = predict(&client, &gateway, Some(TOKEN), upload(dummy_image(), "image/jpeg")).await;
    assert_eq!(status, 429);
    assert_eq!(body, json!({ "error": "Too Many Requests", "status_code": 429 }));
}

#[tokio::test]
async fn test_oversized_request_still_uses_a_rate_limit_slot() {
    let mut config = test_config();
    set_stage(
        &mut config,
        "validation",
        json!({ "max_size_mb": 1, "allowed_types": ["image/jpeg", "image/png"] }),
    );
    let gateway = start_gateway(config).await;
    let client = reqwest::Client::new();

    let oversized = vec![0u8; 1024 * 1024 + 1];
    let (status, body) = predict(&client, &gateway, Some(TOKEN), upload(oversized, "image/jpeg")).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "File exceeds 1MB limit");

    // Exactly at the limit is accepted.
    let (status, _) = predict(&client, &gateway, Some(TOKEN), upload(vec![0u8; 1024 * 1024], "image/jpeg")).await;
    assert_eq!(status, 200);

    for _ in 0..3 {
        let (status, _) = predict(&client, &gateway, Some(TOKEN), upload(dummy_image(), "image/jpeg")).await;
        assert_eq!(status, 200);
    }
    let (status, _) = predict(&client, &gateway, Some(TOKEN), upload(dummy_image(), "image/jpeg")).await;
    assert_eq!(status, 429);
}

#[tokio::test]
async fn test_unauthenticated_requests_do_not_consume_slots() {
    let gateway = start_gateway(test_config()).await;
    let client = reqwest::Client::new();

    for _ in 0..10 {
        let (status, _) = predict(&client, &gateway, None, upload(dummy_image(), "image/jpeg")).await;
        assert_eq!(status, 401);
    }
    for _ in 0..5 {
        let (status, _) = predict(&client, &gateway, Some(TOKEN), upload(dummy_image(), "image/jpeg")).await;
        assert_eq!(status, 200);
    }
}

#[tokio::test]
async fn test_missing_file_part_is_bad_request() {
    let gateway = start_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let form = Form::new().text("note", "no file here");
    let (status, body) = predict(&client, &gateway, Some(TOKEN), form).await;
    assert_eq!(status, 400);
    assert_eq!(body["status_code"], 400);
}

#[tokio::test]
async fn test_missing_token_wins_over_unreadable_upload() {
    let mut config = test_config();
    config.limits.max_body_bytes = 64 * 1024;
    let gateway = start_gateway(config).await;
    let client = reqwest::Client::new();

    let form = Form::new().text("note", "no file here");
    let (status, body) = predict(&client, &gateway, None, form).await;
    assert_eq!(status, 401);
    assert_eq!(body["status_code"], 401);

    let (status, body) = predict(&client, &gateway, None, upload(vec![0u8; 128 * 1024], "image/jpeg")).await;
    assert_eq!(status, 401);
    assert_eq!(body["status_code"], 401);
}

#[tokio::test]
async fn test_body_over_transport_limit_is_413_json() {
    let mut config = test_config();
    config.limits.max_body_bytes = 64 * 1024;
    let gateway = start_gateway(config).await;
    let client = reqwest::Client::new();

    let (status, body) = predict(&client, &gateway, Some(TOKEN), upload(vec![0u8; 128 * 1024], "image/jpeg")).await;
    assert_eq!(status, 413);
    assert_eq!(body["status_code"], 413);
}

#[tokio::test]
async fn test_reference_scenarios_in_sequence() {
    // Same sequence as `gateway-cli scenarios`: every request past
    // authentication takes a rate-limit slot, rejected or not.
    let gateway = start_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let (status, _) = predict(&client, &gateway, None, upload(dummy_image(), "image/jpeg")).await;
    assert_eq!(status, 401);
    let bad = b"This is not an image, it is a malicious text file.".to_vec();
    let (status, _) = predict(&client, &gateway, Some(TOKEN), upload(bad, "text/plain")).await;
    assert_eq!(status, 415);
    let (status, _) = predict(&client, &gateway, Some(TOKEN), upload(dummy_image(), "image/jpeg")).await;
    assert_eq!(status, 200);

    let mut statuses = Vec::new();
    for _ in 0..6 {
        let (status, _) = predict(&client, &gateway, Some(TOKEN), upload(dummy_image(), "image/jpeg")).await;
        statuses.push(status);
    }
    assert_eq!(statuses, [200, 200, 200, 429, 429, 429]);
}

#[tokio::test]
async fn test_disabled_stage_is_skipped() {
    let mut config = test_config();
    for entry in &mut config.security_chain {
        if entry.name == "authentication" {
            entry.enabled = false;
        }
    }
    let gateway = start_gateway(config).await;
    let client = reqwest::Client::new();

    let (status, _) = predict(&client, &gateway, None, upload(dummy_image(), "image/jpeg")).await;
    assert_eq!(status, 200);

    let health: serde_json::Value = client
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["stages"], json!(["rate_limit", "validation", "sanitization"]));
}

#[tokio::test]
async fn test_concurrent_burst_admits_exactly_the_limit() {
    let gateway = start_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let client = client.clone();
        let url = gateway.url("/predict");
        tasks.push(tokio::spawn(async move {
            client
                .post(url)
                .bearer_auth(TOKEN)
                .multipart(upload(dummy_image(), "image/jpeg"))
                .send()
                .await
                .unwrap()
                .status()
                .as_u16()
        }));
    }

    let mut accepted = 0;
    let mut limited = 0;
    for task in tasks {
        match task.await.unwrap() {
            200 => accepted += 1,
            429 => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(accepted, 5);
    assert_eq!(limited, 7);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let gateway = start_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(gateway.url("/predict"))
        .header("x-request-id", "trace-me")
        .multipart(upload(dummy_image(), "image/jpeg"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(response.headers()["x-request-id"], "trace-me");
}
