//! In-process route tests against the in-memory backend.
//!
//! Requests are driven through the router with `tower::ServiceExt::oneshot`,
//! so no server or database is needed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use callsheet_api::{router, AppState, Backend};
use callsheet_clone::{CloneConfig, ReconcilerConfig};
use callsheet_core::{defaults::MEMBERSHIP_COLLECTION, CloneSchema, DocumentStore, EventBus};
use callsheet_db::{seed_demo_template, MemoryDocumentStore};

const TOKEN: &str = "test-admin-token";

struct TestApp {
    router: axum::Router,
    store: Arc<MemoryDocumentStore>,
    template_root_id: Uuid,
}

async fn test_app(checkpoints: bool) -> TestApp {
    test_app_with_token(checkpoints, Some(TOKEN)).await
}

async fn test_app_with_token(checkpoints: bool, admin_token: Option<&str>) -> TestApp {
    let store = Arc::new(MemoryDocumentStore::new());
    let seeded = seed_demo_template(store.as_ref(), Uuid::new_v4())
        .await
        .expect("seed");
    let state = AppState::new(
        Backend::memory(store.clone()),
        CloneSchema::production().expect("schema"),
        CloneConfig::default()
            .with_template_root_id(seeded.root_id)
            .with_checkpoints(checkpoints),
        ReconcilerConfig::default().with_grace_period(Duration::ZERO),
        Arc::new(EventBus::new(64)),
        admin_token.map(str::to_string),
    );
    TestApp {
        router: router(state),
        store,
        template_root_id: seeded.root_id,
    }
}

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = app.router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_account(app: &TestApp, namespace: Uuid) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/api/v1/accounts",
        Some(json!({
            "owner_id": Uuid::new_v4(),
            "owner_namespace": namespace,
            "display_name": "Riley",
        })),
        None,
    )
    .await
}

fn uuid_at(value: &Value, key: &str) -> Option<Uuid> {
    value[key].as_str().and_then(|s| Uuid::parse_str(s).ok())
}

#[tokio::test]
async fn test_health_reports_backend_and_request_id() {
    let app = test_app(false).await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");

    let response = app.router.clone().oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let bytes = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn test_account_creation_clones_demo_project() {
    let app = test_app(false).await;

    let (status, body) = create_account(&app, Uuid::new_v4()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(uuid_at(&body, "account_id").is_some());
    let project = uuid_at(&body, "demo_project_id").expect("demo project");
    assert!(app.store.get("projects", project).await.is_some());
    assert_eq!(
        app.store
            .read_by_parent(MEMBERSHIP_COLLECTION, project)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(app.store.count("accounts").await, 1);
}

#[tokio::test]
async fn test_second_account_in_namespace_reuses_demo_project() {
    let app = test_app(false).await;
    let namespace = Uuid::new_v4();

    let (_, first) = create_account(&app, namespace).await;
    let (status, second) = create_account(&app, namespace).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        uuid_at(&first, "demo_project_id"),
        uuid_at(&second, "demo_project_id")
    );
    assert_eq!(app.store.count("projects").await, 2);
}

#[tokio::test]
async fn test_clone_failure_does_not_block_account_creation() {
    let app = test_app(false).await;
    app.store.fail_creates("projects").await;

    let (status, body) = create_account(&app, Uuid::new_v4()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(uuid_at(&body, "account_id").is_some());
    assert!(body["demo_project_id"].is_null());
    assert_eq!(app.store.count("accounts").await, 1);
}

#[tokio::test]
async fn test_blank_display_name_is_rejected() {
    let app = test_app(false).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/accounts",
        Some(json!({
            "owner_id": Uuid::new_v4(),
            "owner_namespace": Uuid::new_v4(),
            "display_name": "   ",
        })),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());
    assert_eq!(app.store.count("accounts").await, 0);
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let app = test_app(true).await;

    let (status, body) =
        send(&app, Method::GET, "/api/v1/admin/clones/jobs", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/admin/clones/jobs",
        None,
        Some("wrong"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/admin/clones/jobs",
        None,
        Some(TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_admin_routes_are_not_mounted_without_token() {
    let app = test_app_with_token(true, None).await;

    for (method, uri) in [
        (Method::GET, "/api/v1/admin/clones/jobs".to_string()),
        (Method::POST, "/api/v1/admin/clones/reconcile".to_string()),
        (
            Method::POST,
            format!("/api/v1/admin/clones/jobs/{}/resume", Uuid::new_v4()),
        ),
    ] {
        let (status, _) = send(&app, method, &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
    }

    let (status, _) = create_account(&app, Uuid::new_v4()).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_resume_unknown_job_is_not_found() {
    let app = test_app(true).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/admin/clones/jobs/{}/resume", Uuid::new_v4()),
        None,
        Some(TOKEN),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_failed_clone_can_be_resumed_by_operator() {
    let app = test_app(true).await;
    app.store.fail_batch("scenes", 0).await;

    let (status, body) = create_account(&app, Uuid::new_v4()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["demo_project_id"].is_null());

    let (_, jobs) = send(
        &app,
        Method::GET,
        "/api/v1/admin/clones/jobs",
        None,
        Some(TOKEN),
    )
    .await;
    let jobs = jobs.as_array().cloned().unwrap_or_default();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status"], "failed");
    let job_id = uuid_at(&jobs[0], "job_id").expect("job id");
    let root_id = uuid_at(&jobs[0], "new_root_id").expect("root id");

    app.store.clear_faults().await;
    let (status, outcome) = send(
        &app,
        Method::POST,
        &format!("/api/v1/admin/clones/jobs/{}/resume", job_id),
        None,
        Some(TOKEN),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(uuid_at(&outcome, "new_root_id"), Some(root_id));
    assert_eq!(outcome["resumed"], true);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/admin/clones/jobs/{}/resume", job_id),
        None,
        Some(TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    for collection in ["scenes", "shots", "budget_items"] {
        assert_eq!(
            app.store.read_by_parent(collection, root_id).await.unwrap().len(),
            app.store
                .read_by_parent(collection, app.template_root_id)
                .await
                .unwrap()
                .len(),
            "{}",
            collection
        );
    }

    let (_, jobs) = send(
        &app,
        Method::GET,
        "/api/v1/admin/clones/jobs",
        None,
        Some(TOKEN),
    )
    .await;
    assert_eq!(jobs, json!([]));
}

#[tokio::test]
async fn test_orphan_owner_can_be_reprovisioned() {
    let app = test_app(true).await;
    app.store.fail_creates(MEMBERSHIP_COLLECTION).await;
    create_account(&app, Uuid::new_v4()).await;
    app.store.clear_faults().await;

    let (_, jobs) = send(
        &app,
        Method::GET,
        "/api/v1/admin/clones/jobs",
        None,
        Some(TOKEN),
    )
    .await;
    let root_id = uuid_at(&jobs[0], "new_root_id").expect("root id");

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/admin/clones/{}/owner", root_id),
        None,
        Some(TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(uuid_at(&body, "membership_id").is_some());

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/admin/clones/{}/owner", Uuid::new_v4()),
        None,
        Some(TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reconcile_sweeps_orphans() {
    let app = test_app(false).await;
    app.store.fail_creates(MEMBERSHIP_COLLECTION).await;
    create_account(&app, Uuid::new_v4()).await;
    app.store.clear_faults().await;
    create_account(&app, Uuid::new_v4()).await;

    let (status, report) = send(
        &app,
        Method::POST,
        "/api/v1/admin/clones/reconcile",
        None,
        Some(TOKEN),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["examined"], 2);
    assert_eq!(report["owned"], 1);
    assert_eq!(report["orphans"].as_array().map(Vec::len), Some(1));
    // Template plus the owned clone.
    assert_eq!(app.store.count("projects").await, 2);
}
