//! Router-level tests against in-memory scheduler ports.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use depchain_api::{AppState, create_router};
use depchain_core::buildset::BuildResult;
use depchain_core::ids::SourceStampId;
use depchain_scheduler::memory::{MemoryBuildStore, MemoryEventBus, MemoryPendingStore};
use depchain_scheduler::{SchedulerConfig, SchedulerPorts, SchedulerSet};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const CONFIG: &str = r#"
propagated_properties: [version]
schedulers:
  - kind: chain
    name: compile
    builder: Compile
  - kind: chain
    name: test
    builder: Test
    dependencies: [compile]
  - kind: per_commit
    name: on-commit
    branches: [main]
    targets: [test]
"#;

struct TestApp {
    router: Router,
    store: Arc<MemoryBuildStore>,
}

fn app() -> TestApp {
    let store = Arc::new(MemoryBuildStore::new());
    let ports = SchedulerPorts {
        buildsets: store.clone(),
        pending: Arc::new(MemoryPendingStore::new()),
        executor: store.clone(),
        completer: store.clone(),
        event_bus: Arc::new(MemoryEventBus::new()),
        source_stamps: store.clone(),
    };
    let config = SchedulerConfig::from_yaml(CONFIG).unwrap();
    let set = Arc::new(SchedulerSet::build(&config, ports).unwrap());
    TestApp {
        router: create_router(Arc::new(AppState::new(set))),
        store,
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send(&app.router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_requires_running_chains() {
    let app = app();
    let (status, body) = send(&app.router, Method::GET, "/ready", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["schedulers_stopped"], 2);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-abc");
}

#[tokio::test]
async fn test_list_schedulers() {
    let app = app();
    let (status, body) = send(&app.router, Method::GET, "/api/v1/schedulers", None).await;

    assert_eq!(status, StatusCode::OK);
    let schedulers = body["schedulers"].as_array().unwrap();
    assert_eq!(schedulers.len(), 3);

    let test = schedulers.iter().find(|s| s["name"] == "test").unwrap();
    assert_eq!(test["kind"], "chain");
    assert_eq!(test["builder"], "Test");
    assert_eq!(test["upstream"], json!(["compile"]));
    assert_eq!(test["state"], "stopped");

    let on_commit = schedulers.iter().find(|s| s["name"] == "on-commit").unwrap();
    assert_eq!(on_commit["kind"], "per_commit");
    assert!(on_commit.get("state").is_none());
}

#[tokio::test]
async fn test_request_waits_on_dependency_then_completes() {
    let app = app();
    let request = json!({"ssid": "1", "reason": "manual"});

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/v1/schedulers/test/requests",
        Some(request),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "waiting");
    assert_eq!(body["unmet"], json!(["compile"]));

    // The dependency was launched on the caller's behalf.
    let ssid = SourceStampId::new(1);
    let compile = app.store.buildsets_for(ssid, "compile");
    assert_eq!(compile.len(), 1);

    let (status, body) = send(&app.router, Method::GET, "/api/v1/schedulers/test/pending/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let uri = format!("/api/v1/buildsets/{}/complete", compile[0].id);
    let (status, body) = send(&app.router, Method::POST, &uri, Some(json!({"result": "success"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["complete"], true);

    // Listeners are not running; reconcile picks up the completion.
    let (status, body) = send(&app.router, Method::POST, "/api/v1/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["admitted"], 1);
    assert_eq!(app.store.buildsets_for(ssid, "test").len(), 1);
}

#[tokio::test]
async fn test_request_without_dependencies_is_admitted() {
    let app = app();
    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/v1/schedulers/compile/requests",
        Some(json!({"ssid": "ss_7", "reason": "manual", "properties": {"version": "1.2"}})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["outcome"], "admitted");
    assert_eq!(body["buildsets"][0]["builder"], "Compile");

    let uri = format!("/api/v1/buildsets/{}", body["buildsets"][0]["id"]);
    let (status, body) = send(&app.router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source_stamp_id"], 7);
}

#[tokio::test]
async fn test_cancel_pending() {
    let app = app();
    send(
        &app.router,
        Method::POST,
        "/api/v1/schedulers/test/requests",
        Some(json!({"ssid": "3", "reason": "manual"})),
    )
    .await;

    let (status, body) = send(&app.router, Method::DELETE, "/api/v1/schedulers/test/pending/3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], 1);

    let (_, body) = send(&app.router, Method::GET, "/api/v1/schedulers/test/pending", None).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_expire_pending_keeps_fresh_requests() {
    let app = app();
    send(
        &app.router,
        Method::POST,
        "/api/v1/schedulers/test/requests",
        Some(json!({"ssid": "4", "reason": "manual"})),
    )
    .await;

    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/v1/pending/expire",
        Some(json!({"older_than_secs": 3600})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expired"], 0);
}

#[tokio::test]
async fn test_commit_fans_out_on_matching_branch() {
    let app = app();
    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/v1/changes",
        Some(json!({"branch": "main", "revision": "abc123"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["triggered"], json!(["on-commit"]));

    let ssid = SourceStampId::new(body["source_stamp"]["id"].as_i64().unwrap());
    assert_eq!(app.store.buildsets_for(ssid, "compile").len(), 1);
    assert!(app.store.buildsets_for(ssid, "test").is_empty());
}

#[tokio::test]
async fn test_commit_on_other_branch_triggers_nothing() {
    let app = app();
    let (status, body) = send(
        &app.router,
        Method::POST,
        "/api/v1/changes",
        Some(json!({"branch": "feature/x", "revision": "def456"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["triggered"], json!([]));
}

#[tokio::test]
async fn test_error_statuses() {
    let app = app();

    let (status, _) = send(
        &app.router,
        Method::POST,
        "/api/v1/schedulers/missing/requests",
        Some(json!({"ssid": "1", "reason": "manual"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app.router, Method::GET, "/api/v1/schedulers/test/pending/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, Method::GET, "/api/v1/buildsets/99", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let seeded = app
        .store
        .seed_buildset(SourceStampId::new(5), "compile", Some(BuildResult::Success), vec![]);
    let uri = format!("/api/v1/buildsets/{}/complete", seeded.id);
    let (status, _) = send(&app.router, Method::POST, &uri, Some(json!({"result": "failure"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let app = app();
    app.store.set_unavailable(true);

    let (status, _) = send(&app.router, Method::GET, "/api/v1/sourcestamps/1/buildsets", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
