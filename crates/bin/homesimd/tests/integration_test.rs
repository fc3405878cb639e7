//! End-to-end tests for the full homesimd stack.
//!
//! Each test spins up the complete application (JSON file store in a temp
//! directory, real services, real reqwest notifier, real axum router) and
//! exercises the HTTP layer via `tower::ServiceExt::oneshot` — the API itself
//! binds no TCP port. Webhook subscribers are local axum listeners.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::post;
use homesim_adapter_http_axum::router;
use homesim_adapter_http_axum::state::AppState;
use homesim_adapter_storage_json::DocumentStoreCache;
use homesim_adapter_webhook_reqwest::ReqwestWebhookNotifier;
use homesim_app::services::RegistryService;
use homesim_app::simulator::Simulator;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    path: PathBuf,
    _dir: TempDir,
}

/// Build a fully-wired router backed by a JSON file in a fresh temp dir.
async fn app() -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let path = dir.path().join("homesim.json");
    let router = app_at(&path).await;
    TestApp {
        router,
        path,
        _dir: dir,
    }
}

async fn app_at(path: &std::path::Path) -> Router {
    let store = DocumentStoreCache::new()
        .open(path)
        .await
        .expect("store should open");
    let notifier = ReqwestWebhookNotifier::new(Duration::from_secs(2))
        .expect("http client should build");
    let registry = Arc::new(RegistryService::new(store, notifier));
    let simulator = Simulator::new(Arc::clone(&registry), Duration::from_secs(3600));
    router::build(AppState::new(registry, simulator))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_key(mut request: Request<Body>, key: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("X-API-Key", key.parse().unwrap());
    request
}

async fn create_device(app: &Router, payload: Value) -> Value {
    let (status, device) = send(app, json_request("POST", "/api/admin/devices", &payload)).await;
    assert_eq!(status, StatusCode::CREATED, "{device}");
    device
}

async fn create_key(app: &Router, payload: Value) -> String {
    let (status, api_key) = send(app, json_request("POST", "/api/admin/apikeys", &payload)).await;
    assert_eq!(status, StatusCode::CREATED, "{api_key}");
    api_key["key"].as_str().unwrap().to_string()
}

async fn pair(app: &Router, device_id: &str, key: &str) -> StatusCode {
    send(
        app,
        request("PUT", &format!("/api/admin/devices/{device_id}/pairings/{key}")),
    )
    .await
    .0
}

type Delivery = (Option<String>, Value);

/// Start a webhook subscriber that answers 200 and forwards what it receives.
async fn subscriber() -> (String, mpsc::UnboundedReceiver<Delivery>) {
    let (sender, receiver) = mpsc::unbounded_channel::<Delivery>();
    let app = Router::new()
        .route(
            "/hook",
            post(
                |State(sender): State<mpsc::UnboundedSender<Delivery>>,
                 headers: HeaderMap,
                 axum::Json(body): axum::Json<Value>| async move {
                    let key = headers
                        .get("x-api-key")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    let _ = sender.send((key, body));
                    StatusCode::OK
                },
            ),
        )
        .with_state(sender);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), receiver)
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_return_ok_when_health_check_called() {
    let app = app().await;
    let response = app
        .router
        .oneshot(request("GET", "/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_return_created_device_unchanged_when_read_back() {
    let app = app().await;
    let created = create_device(
        &app.router,
        json!({"type": "bulb_rgb_brightness", "name": "Hallway", "brightness": 40}),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let (status, fetched) = send(&app.router, request("GET", &format!("/api/admin/devices/{id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);
    assert_eq!(fetched["brightness"], 40);
    assert_eq!(fetched["on"], false);
}

#[tokio::test]
async fn should_persist_devices_across_restarts() {
    let app = app().await;
    let created = create_device(&app.router, json!({"type": "curtain", "name": "Bedroom"})).await;
    let id = created["id"].as_str().unwrap();

    let restarted = app_at(&app.path).await;
    let (status, fetched) = send(&restarted, request("GET", &format!("/api/admin/devices/{id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Bedroom");
    let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&app.path).unwrap()).unwrap();
    assert_eq!(on_disk["devices"][id]["type"], "curtain");
}

#[tokio::test]
async fn should_forget_deleted_device() {
    let app = app().await;
    let created = create_device(&app.router, json!({"type": "thermometer", "name": "Attic"})).await;
    let id = created["id"].as_str().unwrap();

    let (status, _) = send(&app.router, request("DELETE", &format!("/api/admin/devices/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app.router, request("GET", &format!("/api/admin/devices/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app.router, request("DELETE", &format!("/api/admin/devices/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn should_reject_out_of_range_value_and_keep_state() {
    let app = app().await;
    let created = create_device(&app.router, json!({"type": "curtain", "name": "Patio"})).await;
    let id = created["id"].as_str().unwrap();

    let (status, _) = send(
        &app.router,
        json_request("PATCH", &format!("/api/admin/devices/{id}/state"), &json!({"position": 150})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, fetched) = send(&app.router, request("GET", &format!("/api/admin/devices/{id}"))).await;
    assert_eq!(fetched["position"], 0);
}

// ---------------------------------------------------------------------------
// Pairing and authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_treat_pairing_as_a_set() {
    let app = app().await;
    let device = create_device(&app.router, json!({"type": "bulb_on_off", "name": "Desk"})).await;
    let id = device["id"].as_str().unwrap();
    let key = create_key(&app.router, json!({"name": "Integrator"})).await;

    assert_eq!(pair(&app.router, id, &key).await, StatusCode::NO_CONTENT);
    assert_eq!(pair(&app.router, id, &key).await, StatusCode::NO_CONTENT);
    let (_, fetched) = send(&app.router, request("GET", &format!("/api/admin/devices/{id}"))).await;
    assert_eq!(fetched["pairedApiKeys"], json!([key]));

    let other = create_key(&app.router, json!({"name": "Other"})).await;
    let (status, _) = send(
        &app.router,
        request("DELETE", &format!("/api/admin/devices/{id}/pairings/{other}")),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, fetched) = send(&app.router, request("GET", &format!("/api/admin/devices/{id}"))).await;
    assert_eq!(fetched["pairedApiKeys"], json!([key]));
}

#[tokio::test]
async fn should_not_pair_with_unknown_key() {
    let app = app().await;
    let device = create_device(&app.router, json!({"type": "bulb_on_off", "name": "Desk"})).await;
    let id = device["id"].as_str().unwrap();

    assert_eq!(pair(&app.router, id, "missing").await, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn should_keep_every_key_when_deleting_an_encoded_slash() {
    let app = app().await;
    let first = create_key(&app.router, json!({"name": "First"})).await;
    let second = create_key(&app.router, json!({"name": "Second"})).await;

    let (status, _) = send(&app.router, request("DELETE", "/api/admin/apikeys/%2F")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, keys) = send(&app.router, request("GET", "/api/admin/apikeys")).await;
    let mut listed: Vec<&str> = keys
        .as_array()
        .unwrap()
        .iter()
        .map(|api_key| api_key["key"].as_str().unwrap())
        .collect();
    listed.sort_unstable();
    let mut expected = vec![first.as_str(), second.as_str()];
    expected.sort_unstable();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn should_only_expose_paired_devices_to_a_key() {
    let app = app().await;
    let paired = create_device(&app.router, json!({"type": "bulb_on_off", "name": "Paired"})).await;
    let hidden = create_device(&app.router, json!({"type": "bulb_on_off", "name": "Hidden"})).await;
    let key = create_key(&app.router, json!({"name": "Integrator"})).await;
    pair(&app.router, paired["id"].as_str().unwrap(), &key).await;

    let (status, devices) = send(&app.router, with_key(request("GET", "/api/v1/devices"), &key)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = devices
        .as_array()
        .unwrap()
        .iter()
        .map(|device| device["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Paired"]);

    let hidden_id = hidden["id"].as_str().unwrap();
    let (status, _) = send(
        &app.router,
        with_key(request("GET", &format!("/api/v1/devices/{hidden_id}")), &key),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn should_stamp_last_used_on_authenticated_call() {
    let app = app().await;
    let key = create_key(&app.router, json!({"name": "Integrator"})).await;

    let (status, _) = send(&app.router, with_key(request("GET", "/api/v1/devices"), &key)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, api_key) = send(&app.router, request("GET", &format!("/api/admin/apikeys/{key}"))).await;
    assert!(api_key["lastUsed"].is_string());
}

#[tokio::test]
async fn should_reject_deactivated_key() {
    let app = app().await;
    let key = create_key(&app.router, json!({"name": "Integrator"})).await;

    let (status, api_key) = send(
        &app.router,
        json_request("PATCH", &format!("/api/admin/apikeys/{key}"), &json!({"isActive": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(api_key["isActive"], false);

    let (status, _) = send(&app.router, with_key(request("GET", "/api/v1/devices"), &key)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn should_unpair_and_lock_out_deleted_key() {
    let app = app().await;
    let device = create_device(&app.router, json!({"type": "bulb_on_off", "name": "Desk"})).await;
    let id = device["id"].as_str().unwrap();
    let key = create_key(&app.router, json!({"name": "Integrator"})).await;
    pair(&app.router, id, &key).await;

    let (status, _) = send(&app.router, request("DELETE", &format!("/api/admin/apikeys/{key}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, fetched) = send(&app.router, request("GET", &format!("/api/admin/devices/{id}"))).await;
    assert_eq!(fetched["pairedApiKeys"], json!([]));
    let (status, _) = send(&app.router, with_key(request("GET", "/api/v1/devices"), &key)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Third-party control and webhooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_reject_read_only_update_and_keep_stored_value() {
    let app = app().await;
    let device = create_device(
        &app.router,
        json!({"type": "thermometer", "name": "Kitchen", "temperature": 21.0}),
    )
    .await;
    let id = device["id"].as_str().unwrap();
    let key = create_key(&app.router, json!({"name": "Integrator"})).await;
    pair(&app.router, id, &key).await;

    let (status, body) = send(
        &app.router,
        with_key(
            json_request("PATCH", &format!("/api/v1/devices/{id}/state"), &json!({"temperature": 30.0})),
            &key,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("read-only"));

    let (_, fetched) = send(&app.router, request("GET", &format!("/api/admin/devices/{id}"))).await;
    assert_eq!(fetched["temperature"], 21.0);
}

#[tokio::test]
async fn should_reject_rename_from_third_party() {
    let app = app().await;
    let device = create_device(&app.router, json!({"type": "bulb_on_off", "name": "Desk"})).await;
    let id = device["id"].as_str().unwrap();
    let key = create_key(&app.router, json!({"name": "Integrator"})).await;
    pair(&app.router, id, &key).await;

    let (status, _) = send(
        &app.router,
        with_key(
            json_request("PATCH", &format!("/api/v1/devices/{id}/state"), &json!({"name": "Mine"})),
            &key,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn should_notify_subscriber_with_changed_fields_only() {
    let app = app().await;
    let (url, mut deliveries) = subscriber().await;
    let device = create_device(&app.router, json!({"type": "bulb_rgb_brightness", "name": "Lamp"})).await;
    let id = device["id"].as_str().unwrap();
    let key = create_key(&app.router, json!({"name": "Integrator", "webhookUrl": url})).await;
    pair(&app.router, id, &key).await;

    let (status, updated) = send(
        &app.router,
        with_key(
            json_request(
                "PATCH",
                &format!("/api/v1/devices/{id}/state"),
                &json!({"on": true, "brightness": 100}),
            ),
            &key,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["on"], true);

    let (header, payload) = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
        .await
        .expect("webhook should arrive")
        .unwrap();
    assert_eq!(header.as_deref(), Some(key.as_str()));
    assert_eq!(payload["deviceId"], id);
    assert_eq!(payload["deviceType"], "bulb_rgb_brightness");
    // brightness already was 100
    assert_eq!(payload["changes"], json!({"on": true}));
}

#[tokio::test]
async fn should_report_empty_changes_for_no_op_update() {
    let app = app().await;
    let (url, mut deliveries) = subscriber().await;
    let device = create_device(&app.router, json!({"type": "bulb_on_off", "name": "Desk"})).await;
    let id = device["id"].as_str().unwrap();
    let key = create_key(&app.router, json!({"name": "Integrator", "webhookUrl": url})).await;
    pair(&app.router, id, &key).await;

    let (status, updated) = send(
        &app.router,
        json_request("PATCH", &format!("/api/admin/devices/{id}/state"), &json!({"on": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["on"], false);

    let (_, payload) = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
        .await
        .expect("webhook should arrive")
        .unwrap();
    assert_eq!(payload["changes"], json!({}));
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_cancel_running_curtain_action() {
    let app = app().await;
    let device = create_device(&app.router, json!({"type": "curtain", "name": "Living room"})).await;
    let id = device["id"].as_str().unwrap();
    let key = create_key(&app.router, json!({"name": "Integrator"})).await;
    pair(&app.router, id, &key).await;

    let (status, started) = send(
        &app.router,
        with_key(request("POST", &format!("/api/v1/devices/{id}/actions/open")), &key),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["status"], "IN_PROGRESS");
    let action_id = started["actionId"].as_str().unwrap().to_string();

    let (_, running) = send(&app.router, request("GET", "/api/admin/actions")).await;
    assert_eq!(running, json!([action_id]));

    let (status, _) = send(
        &app.router,
        with_key(
            request("DELETE", &format!("/api/v1/devices/{id}/actions/{action_id}")),
            &key,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, fetched) = send(&app.router, request("GET", &format!("/api/admin/devices/{id}"))).await;
    let action = &fetched["activeActions"][&action_id];
    assert_eq!(action["status"], "FAILED");
    assert_eq!(action["error"], "Action cancelled");
    assert!(action["completedAt"].is_string());
    assert_eq!(fetched["position"], 0);

    let (_, running) = send(&app.router, request("GET", "/api/admin/actions")).await;
    assert_eq!(running, json!([]));
    let (status, _) = send(
        &app.router,
        with_key(
            request("DELETE", &format!("/api/v1/devices/{id}/actions/{action_id}")),
            &key,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn should_reject_action_unsupported_by_device_type() {
    let app = app().await;
    let device = create_device(&app.router, json!({"type": "bulb_on_off", "name": "Desk"})).await;
    let id = device["id"].as_str().unwrap();
    let key = create_key(&app.router, json!({"name": "Integrator"})).await;
    pair(&app.router, id, &key).await;

    let (status, _) = send(
        &app.router,
        with_key(request("POST", &format!("/api/v1/devices/{id}/actions/open")), &key),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
