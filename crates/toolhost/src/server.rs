//! HTTP surface for the toolhost.
//!
//! `POST /mcp` carries JSON-RPC requests, `DELETE /mcp` terminates a
//! session and `GET /health` reports liveness.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mcp::SESSION_ID_HEADER;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{Error, Result, TransportFault};
use crate::fs::{FsContext, filesystem_registry};
use crate::manager::{RegistryFactory, SessionManager};
use crate::registry::DEFAULT_TOOL_TIMEOUT;

/// Toolhost process settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Base for relative tool paths.
    pub workdir: PathBuf,
    pub tool_timeout: Duration,
    /// `None` disables idle eviction.
    pub idle_timeout: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3333)),
            workdir: PathBuf::from("."),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            idle_timeout: Some(Duration::from_secs(30 * 60)),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
struct AppState {
    manager: Arc<SessionManager>,
}

/// Build the router over an existing session manager.
pub fn router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/mcp", post(handle_post).delete(handle_delete))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { manager })
}

/// Session manager serving the filesystem tools.
///
/// The registry is built once up front so that registration errors are
/// fatal here instead of on the first request.
pub fn filesystem_manager(config: &ServerConfig) -> Result<SessionManager> {
    let ctx = FsContext::new(config.workdir.clone());
    let timeout = config.tool_timeout;
    filesystem_registry(ctx.clone(), timeout)?;

    let factory: RegistryFactory =
        Arc::new(move || filesystem_registry(ctx.clone(), timeout).unwrap_or_default());
    let manager = SessionManager::new(factory);
    Ok(match config.idle_timeout {
        Some(idle) => manager.with_idle_timeout(idle),
        None => manager,
    })
}

/// Run the toolhost until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let manager = Arc::new(filesystem_manager(&config)?);

    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|source| Error::Bind {
            addr: config.addr.to_string(),
            source,
        })?;
    info!(
        addr = %config.addr,
        workdir = %config.workdir.display(),
        "toolhost listening"
    );

    let sweeper = config
        .idle_timeout
        .map(|_| manager.spawn_sweeper(config.sweep_interval));

    axum::serve(listener, router(Arc::clone(&manager)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    manager.shutdown().await;
    info!("toolhost stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, McpHttpError> {
    let session_id = session_header(&headers)?;
    let handled = state.manager.handle(session_id, &body).await?;

    let mut response = match handled.response {
        Some(body) => (StatusCode::OK, Json(body)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Some(id) = handled.session_id {
        if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
            response.headers_mut().insert(SESSION_ID_HEADER, value);
        }
    }
    Ok(response)
}

async fn handle_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<StatusCode, McpHttpError> {
    let id = session_header(&headers)?.ok_or(TransportFault::MissingSession(SESSION_ID_HEADER))?;
    state.manager.close(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.manager.len().await,
    }))
}

fn session_header(headers: &HeaderMap) -> std::result::Result<Option<&str>, McpHttpError> {
    headers
        .get(SESSION_ID_HEADER)
        .map(|raw| {
            raw.to_str().map_err(|_| {
                McpHttpError::bad_request(
                    "invalid_session_id",
                    "Mcp-Session-Id header must be valid UTF-8",
                )
            })
        })
        .transpose()
}

#[derive(Debug)]
struct McpHttpError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl McpHttpError {
    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }

    fn service_unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code,
            message: message.into(),
        }
    }
}

impl From<TransportFault> for McpHttpError {
    fn from(fault: TransportFault) -> Self {
        let message = fault.to_string();
        match fault {
            TransportFault::Malformed(_) => Self::bad_request("malformed_request", message),
            TransportFault::BatchUnsupported => Self::bad_request("batch_unsupported", message),
            TransportFault::MissingSession(_) => Self::bad_request("missing_session", message),
            TransportFault::UnknownSession(_) => Self::not_found("unknown_session", message),
            TransportFault::Closed => Self::service_unavailable("session_closed", message),
        }
    }
}

impl IntoResponse for McpHttpError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, code = self.code, message = %self.message, "request rejected");
        let body = Json(McpErrorBody {
            error: self.code,
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Serialize)]
struct McpErrorBody {
    error: &'static str,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use mcp::{
        CallToolResult, InitializeParams, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    };
    use serde_json::json;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> (Router, Arc<SessionManager>) {
        let config = ServerConfig {
            workdir: dir.to_path_buf(),
            ..ServerConfig::default()
        };
        let manager = Arc::new(filesystem_manager(&config).unwrap());
        (router(Arc::clone(&manager)), manager)
    }

    fn post_json(session: Option<&str>, body: &JsonRpcRequest) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some(id) = session {
            builder = builder.header(SESSION_ID_HEADER, id);
        }
        builder
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn json_body(response: Response) -> JsonRpcResponse {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn initialize(app: &Router) -> String {
        let request =
            JsonRpcRequest::new(1i64, "initialize").with_params(InitializeParams::default());
        let response = app.clone().oneshot(post_json(None, &request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response
            .headers()
            .get(SESSION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn initialize_returns_a_session_header() {
        let dir = tempfile::tempdir().unwrap();
        let (app, manager) = app(dir.path());
        let id = initialize(&app).await;
        assert!(manager.contains(&id.parse().unwrap()).await);
    }

    #[tokio::test]
    async fn tools_list_advertises_filesystem_tools() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let id = initialize(&app).await;

        let response = app
            .clone()
            .oneshot(post_json(Some(&id), &JsonRpcRequest::new(2i64, "tools/list")))
            .await
            .unwrap();
        let list: ListToolsResult =
            serde_json::from_value(json_body(response).await.into_result().unwrap()).unwrap();
        let names: Vec<_> = list.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "create_file",
                "read_file",
                "update_file",
                "append_file",
                "delete_file",
                "list_directory"
            ]
        );
    }

    #[tokio::test]
    async fn tool_calls_touch_the_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let id = initialize(&app).await;

        let create = JsonRpcRequest::new(2i64, "tools/call").with_params(json!({
            "name": "create_file",
            "arguments": {"path": "notes.txt", "content": "hello"}
        }));
        let response = app.clone().oneshot(post_json(Some(&id), &create)).await.unwrap();
        let result: CallToolResult =
            serde_json::from_value(json_body(response).await.into_result().unwrap()).unwrap();
        assert!(!result.is_error, "{}", result.text_content());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn notifications_are_accepted_without_body() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let id = initialize(&app).await;

        let response = app
            .clone()
            .oneshot(post_json(
                Some(&id),
                &JsonRpcRequest::notification("notifications/initialized"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .body(Body::from("{"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_terminates_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (app, manager) = app(dir.path());
        let id = initialize(&app).await;

        let delete = || {
            Request::builder()
                .method(Method::DELETE)
                .uri("/mcp")
                .header(SESSION_ID_HEADER, id.as_str())
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(manager.is_empty().await);

        let response = app.oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_session_count() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        initialize(&app).await;

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"status": "ok", "sessions": 1}));
    }

    #[tokio::test]
    async fn closed_transport_is_a_retryable_error() {
        let response = McpHttpError::from(TransportFault::Closed).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "session_closed");
    }
}
