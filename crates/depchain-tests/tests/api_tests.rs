//! API integration tests against a live server.
//!
//! Run with: `cargo test -p depchain-tests --test api_tests --features integration`

#![cfg(feature = "integration")]

use depchain_tests::{
    CHAIN_CONFIG, SINGLE_CONFIG,
    context::TestContext,
    helpers::{ApiTestClient, start_test_server, wait_for},
};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;

#[tokio::test]
async fn test_health_endpoint() {
    let ctx = TestContext::new().await.expect("Failed to create test context");
    let set = ctx.scheduler_set(SINGLE_CONFIG).unwrap();
    let (addr, _handle) = start_test_server(set).await.expect("Failed to start server");

    let client = ApiTestClient::new(addr).unwrap();
    assert!(client.health().await.expect("Health check failed"));
}

#[tokio::test]
async fn test_ready_once_schedulers_start() {
    let ctx = TestContext::new().await.expect("Failed to create test context");
    let set = ctx.scheduler_set(SINGLE_CONFIG).unwrap();
    let (addr, _handle) = start_test_server(set.clone()).await.unwrap();
    let client = ApiTestClient::new(addr).unwrap();

    let resp = client.get("/ready").await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    set.start().await.unwrap();
    let resp = client.get("/ready").await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    set.stop().await;
}

#[tokio::test]
async fn test_commit_and_completion_callbacks() {
    let ctx = TestContext::new().await.expect("Failed to create test context");
    let set = ctx.scheduler_set(CHAIN_CONFIG).unwrap();
    set.start().await.unwrap();
    let (addr, _handle) = start_test_server(set.clone()).await.unwrap();
    let client = ApiTestClient::new(addr).unwrap();

    let resp = client
        .post("/api/v1/changes", &json!({"branch": "main", "revision": "abc123"}))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let commit: Value = resp.json().await.unwrap();
    let ssid = commit["source_stamp"]["id"].as_i64().unwrap();

    let list_path = format!("/api/v1/sourcestamps/{}/buildsets", ssid);
    let listed: Value = client.get(&list_path).await.unwrap().json().await.unwrap();
    assert_eq!(listed["total"], 1);
    let update_id = listed["buildsets"][0]["id"].as_i64().unwrap();

    let resp = client
        .get(&format!("/api/v1/schedulers/compile/pending/{}", ssid))
        .await
        .unwrap();
    let pending: Value = resp.json().await.unwrap();
    assert_eq!(pending["total"], 1);

    let resp = client
        .post(
            &format!("/api/v1/buildsets/{}/complete", update_id),
            &json!({"result": "success"}),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let admitted = wait_for(Duration::from_secs(10), Duration::from_millis(50), || async {
        let listed: Value = match client.get(&list_path).await {
            Ok(resp) => resp.json().await.unwrap_or(Value::Null),
            Err(_) => return false,
        };
        listed["total"] == 2
    })
    .await;
    assert!(admitted, "compile was not admitted through the completion callback");

    let resp = client
        .post(
            &format!("/api/v1/buildsets/{}/complete", update_id),
            &json!({"result": "success"}),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    set.stop().await;
}

#[tokio::test]
async fn test_cancel_pending_request() {
    let ctx = TestContext::new().await.expect("Failed to create test context");
    let set = ctx.scheduler_set(CHAIN_CONFIG).unwrap();
    let (addr, _handle) = start_test_server(set).await.unwrap();
    let client = ApiTestClient::new(addr).unwrap();

    let commit: Value = client
        .post("/api/v1/changes", &json!({"branch": "release", "revision": "r1"}))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(commit["triggered"], json!([]));
    let ssid = commit["source_stamp"]["id"].as_i64().unwrap();

    let submit: Value = client
        .post(
            "/api/v1/schedulers/test/requests",
            &json!({"ssid": ssid.to_string(), "reason": "manual"}),
        )
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(submit["outcome"], "waiting");
    assert_eq!(submit["unmet"], json!(["compile"]));

    let resp = client
        .delete(&format!("/api/v1/schedulers/test/pending/{}", ssid))
        .await
        .unwrap();
    let cancelled: Value = resp.json().await.unwrap();
    assert_eq!(cancelled["cancelled"], 1);
}
