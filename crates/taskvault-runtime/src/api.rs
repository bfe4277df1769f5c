//! HTTP control plane using Axum.
//!
//! Thin JSON surface over the vault: list, inspect, submit, cancel and
//! delete tasks, plus queue counts and runtime health.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use taskvault_core::config::ApiConfig;
use taskvault_core::{Component, Result, ServiceLoop, VaultError};
use taskvault_scheduler::{TaskId, Vault};

use crate::health::HealthProbe;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<Vault>,
    pub health: HealthProbe,
}

/// Error body: `{"ok": false, "error": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        let status = match &e {
            VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_submission_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "ok": false, "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult = std::result::Result<Json<Value>, ApiError>;

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/tasks", get(list_tasks).post(submit_task))
        .route("/api/v1/tasks/by-name/{name}", get(get_task_by_name))
        .route("/api/v1/tasks/{id}", get(get_task).delete(delete_task))
        .route("/api/v1/tasks/{id}/history", get(task_history))
        .route("/api/v1/tasks/{id}/{verb}", post(task_action))
        .route("/api/v1/queues", get(queue_counts))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let health = state.health.check();
    let (status, label) = if health.healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(json!({
            "status": label,
            "service": "taskvault",
            "version": env!("CARGO_PKG_VERSION"),
            "health": health,
        })),
    )
        .into_response()
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tasks = state.vault.list();
    Json(json!({
        "ok": true,
        "count": tasks.len(),
        "tasks": tasks,
    }))
}

async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> std::result::Result<(StatusCode, Json<Value>), ApiError> {
    let id = state.vault.submit_payload(&payload)?;
    let task = state.vault.get(id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "id": id, "task": task })),
    ))
}

async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<TaskId>) -> ApiResult {
    let task = state
        .vault
        .get(id)
        .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
    Ok(Json(json!({ "ok": true, "task": task })))
}

async fn get_task_by_name(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult {
    let task = state
        .vault
        .find_by_name(&name)
        .ok_or(VaultError::NotFound(name))?;
    Ok(Json(json!({ "ok": true, "task": task })))
}

async fn task_history(State(state): State<Arc<AppState>>, Path(id): Path<TaskId>) -> ApiResult {
    let history = state.vault.history(id)?;
    Ok(Json(json!({ "ok": true, "id": id, "history": history })))
}

async fn delete_task(State(state): State<Arc<AppState>>, Path(id): Path<TaskId>) -> ApiResult {
    Ok(Json(delete_verb(&state.vault, id)?))
}

async fn queue_counts(State(state): State<Arc<AppState>>) -> Json<Value> {
    let counts = state.vault.queue_counts();
    Json(json!({ "ok": true, "queues": counts, "total": counts.total() }))
}

// ── Task actions ──────────────────────────────────────

type TaskVerb = fn(&Vault, TaskId) -> Result<Value>;

/// Actions reachable through `POST /api/v1/tasks/{id}/{verb}`.
const TASK_VERBS: &[(&str, TaskVerb)] = &[("cancel", cancel_verb), ("delete", delete_verb)];

fn cancel_verb(vault: &Vault, id: TaskId) -> Result<Value> {
    let canceled = vault.cancel(id)?;
    Ok(json!({ "ok": true, "id": id, "canceled": canceled }))
}

fn delete_verb(vault: &Vault, id: TaskId) -> Result<Value> {
    let task = vault.delete(id)?;
    Ok(json!({ "ok": true, "id": id, "deleted": task }))
}

async fn task_action(
    State(state): State<Arc<AppState>>,
    Path((id, verb)): Path<(TaskId, String)>,
) -> ApiResult {
    let (_, action) = TASK_VERBS
        .iter()
        .find(|(name, _)| *name == verb)
        .ok_or_else(|| ApiError::not_found(format!("Unknown task action '{verb}'")))?;
    Ok(Json(action(state.vault.as_ref(), id)?))
}

// ── Server component ──────────────────────────────────

/// The control plane as a supervised component.
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
    service: ServiceLoop,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            service: ServiceLoop::new("api"),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

async fn serve(listener: tokio::net::TcpListener, app: Router, token: CancellationToken) {
    let shutdown = async move { token.cancelled().await };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("❌ API server error: {e}");
    }
    tracing::info!("🛑 API server stopped");
}

#[async_trait]
impl Component for ApiServer {
    fn name(&self) -> &str {
        "api"
    }

    fn is_running(&self) -> bool {
        self.service.is_running()
    }

    async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let addr = self.address();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| VaultError::Component(format!("api: cannot bind {addr}: {e}")))?;
        let bound = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or(addr);
        tracing::info!("🌐 API listening on http://{bound}");
        let app = build_router(self.state.clone());
        self.service.spawn(move |token| serve(listener, app, token));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.service.shutdown(Duration::from_secs(5)).await;
        Ok(())
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.service.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use taskvault_core::config::{TaskDefaults, VaultConfig};
    use tower::ServiceExt;

    fn state() -> AppState {
        let vault = Arc::new(Vault::new(
            VaultConfig {
                blacklist: vec!["command".into()],
                ..VaultConfig::default()
            },
            TaskDefaults::default(),
        ));
        let health = HealthProbe::new(Arc::clone(&vault), Vec::new());
        AppState { vault, health }
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => request
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(state());
        let (status, body) = call(app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["health"]["healthy"], true);
    }

    #[tokio::test]
    async fn test_submit_get_and_list() {
        let state = state();
        let app = build_router(state.clone());

        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/v1/tasks",
            Some(json!({"type": "sleep", "name": "nap", "seconds": 1, "priority": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_u64().unwrap();
        assert_eq!(body["task"]["status"], "queued");

        let (status, body) = call(app.clone(), "GET", &format!("/api/v1/tasks/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["name"], "nap");
        assert_eq!(body["task"]["priority"], 2);

        let (status, body) = call(app.clone(), "GET", "/api/v1/tasks/by-name/nap", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["id"], id);

        let (_, body) = call(app.clone(), "GET", "/api/v1/tasks", None).await;
        assert_eq!(body["count"], 1);

        let (_, body) = call(app, "GET", "/api/v1/queues", None).await;
        assert_eq!(body["queues"]["queued"], 1);
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn test_submission_errors_are_400() {
        let app = build_router(state());
        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/v1/tasks",
            Some(json!({"type": "teleport"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().contains("teleport"));

        let (status, _) = call(
            app,
            "POST",
            "/api/v1/tasks",
            Some(json!({"type": "command", "command": "rm"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_actions_and_delete() {
        let state = state();
        let id = state
            .vault
            .submit_payload(&json!({"type": "sleep", "name": "nap", "seconds": 1}))
            .unwrap();
        let app = build_router(state.clone());

        let (status, body) =
            call(app.clone(), "POST", &format!("/api/v1/tasks/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["canceled"], true);

        let (status, body) =
            call(app.clone(), "POST", &format!("/api/v1/tasks/{id}/explode"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("explode"));

        let (status, body) =
            call(app.clone(), "GET", &format!("/api/v1/tasks/{id}/history"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["history"], json!([]));

        let (status, body) = call(app.clone(), "DELETE", &format!("/api/v1/tasks/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"]["name"], "nap");

        let (status, _) = call(app, "GET", &format!("/api/v1/tasks/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(state.vault.list().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let app = build_router(state());
        let (status, body) = call(app.clone(), "GET", "/api/v1/tasks/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
        let (status, _) = call(app, "POST", "/api/v1/tasks/999/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_component_binds_and_stops() {
        let server = ApiServer::new(
            ApiConfig {
                enabled: true,
                host: "127.0.0.1".into(),
                port: 0,
            },
            state(),
        );
        server.start().await.unwrap();
        assert!(server.is_running());
        server.stop().await.unwrap();
        assert!(!server.is_running());
    }
}
