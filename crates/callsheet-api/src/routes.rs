//! HTTP routes.

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::provisioning::{provision_account, CreateAccountRequest};
use crate::state::AppState;

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Build the application router.
///
/// Admin routes are mounted only when an admin token is configured.
pub fn router(state: AppState) -> Router {
    let mut api = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/accounts", post(create_account));

    if state.admin_token.is_some() {
        let admin = Router::new()
            .route("/clones/jobs", get(list_clone_jobs))
            .route("/clones/jobs/:job_id/resume", post(resume_clone_job))
            .route("/clones/:root_id/owner", post(reprovision_owner))
            .route("/clones/reconcile", post(reconcile_now))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));
        api = api.nest("/api/v1/admin", admin);
    }

    api.layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .with_state(state)
}

// =============================================================================
// AUTH
// =============================================================================

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::Unauthorized("admin routes are disabled".into()));
    };
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(expected) {
        warn!(
            subsystem = "api",
            component = "auth",
            path = %request.uri().path(),
            "Rejected admin request"
        );
        return Err(ApiError::Unauthorized("admin token required".into()));
    }
    Ok(next.run(request).await)
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.backend_name(),
    }))
}

async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = provision_account(&state, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_clone_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.orchestrator.list_incomplete().await?;
    Ok(Json(jobs))
}

async fn resume_clone_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.orchestrator.resume(job_id).await?;
    info!(
        subsystem = "api",
        component = "admin",
        op = "resume",
        job_id = %job_id,
        new_root_id = %outcome.new_root_id,
        "Clone job resumed by operator"
    );
    Ok(Json(outcome))
}

async fn reprovision_owner(
    State(state): State<AppState>,
    Path(root_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let membership_id = state.orchestrator.reprovision_owner(root_id).await?;
    info!(
        subsystem = "api",
        component = "admin",
        op = "reprovision_owner",
        new_root_id = %root_id,
        "Clone owner re-provisioned by operator"
    );
    Ok(Json(serde_json::json!({
        "root_id": root_id,
        "membership_id": membership_id,
    })))
}

async fn reconcile_now(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.reconciler.sweep().await?;
    Ok(Json(report))
}
