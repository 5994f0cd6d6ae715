//! HTTP API over the [`Engine`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST`   | `/documents` | Queue a document for creation |
//! | `GET`    | `/documents/{id}` | Fetch a committed document |
//! | `DELETE` | `/documents/{id}` | Delete a document and its references |
//! | `POST`   | `/contexts` | Queue a context for creation |
//! | `GET`    | `/contexts/{id}` | Fetch a context |
//! | `PUT`    | `/contexts/{id}` | Replace a context, dropping unknown documents |
//! | `DELETE` | `/contexts/{id}` | Delete a context |
//! | `GET`    | `/contexts/{id}/content` | Context joined with its documents |
//! | `GET`    | `/tasks/failed` | Failed task intents |
//! | `POST`   | `/tasks/retry` | Requeue all failed intents |
//! | `GET`    | `/health` | Queue depth and store counts (no auth) |
//!
//! Every route except `/health` requires an `X-API-Key` header matching
//! `[server].api_key`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Document not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400/422), `unauthorized` (401),
//! `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::engine::{Engine, Status};
use crate::error::CoreError;
use crate::models::{Context, ContextContent, Document, TaskIntent};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    engine: Engine,
    api_key: Arc<str>,
}

/// Starts the processor and the HTTP server.
///
/// Binds to `[server].bind` and runs until Ctrl-C, then stops the processor
/// loop. Pending intents are dropped with the process.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Engine::from_config(&config.queue);
    let worker = engine.processor().spawn();

    let app = router(engine, &config.server.api_key);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("Context queue server listening on http://{}", listener.local_addr()?);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    worker.abort();
    tracing::info!("Server stopped");
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Build the full router. The processor is not started here.
pub fn router(engine: Engine, api_key: &str) -> Router {
    let state = AppState {
        engine,
        api_key: Arc::from(api_key),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/documents", post(handle_create_document))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/contexts", post(handle_create_context))
        .route(
            "/contexts/{id}",
            get(handle_get_context)
                .put(handle_update_context)
                .delete(handle_delete_context),
        )
        .route("/contexts/{id}/content", get(handle_context_content))
        .route("/tasks/failed", get(handle_failed_tasks))
        .route("/tasks/retry", post(handle_retry_tasks))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(handle_health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(&*state.api_key) {
        return Err(AppError {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized".to_string(),
            message: "Invalid API key".to_string(),
        });
    }
    Ok(next.run(request).await)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        if err.is_not_found() {
            AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found".to_string(),
                message: err.to_string(),
            }
        } else {
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: rejection.status(),
            code: "bad_request".to_string(),
            message: rejection.body_text(),
        }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

// ============ Documents ============

async fn handle_create_document(
    State(state): State<AppState>,
    payload: Result<Json<Document>, JsonRejection>,
) -> Result<Json<Document>, AppError> {
    let Json(doc) = payload?;
    Ok(Json(state.engine.submit_document(doc)?))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    Ok(Json(state.engine.get_document(&id)?))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.engine.delete_document(&id)?;
    Ok(Json(MessageResponse {
        message: "Document deleted successfully".to_string(),
    }))
}

// ============ Contexts ============

async fn handle_create_context(
    State(state): State<AppState>,
    payload: Result<Json<Context>, JsonRejection>,
) -> Result<Json<Context>, AppError> {
    let Json(ctx) = payload?;
    Ok(Json(state.engine.submit_context(ctx)?))
}

async fn handle_get_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Context>, AppError> {
    Ok(Json(state.engine.get_context(&id)?))
}

async fn handle_update_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Context>, JsonRejection>,
) -> Result<Json<Context>, AppError> {
    let Json(ctx) = payload?;
    Ok(Json(state.engine.update_context(&id, ctx)?))
}

async fn handle_delete_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.engine.delete_context(&id)?;
    Ok(Json(MessageResponse {
        message: "Context deleted successfully".to_string(),
    }))
}

async fn handle_context_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContextContent>, AppError> {
    Ok(Json(state.engine.context_content(&id)?))
}

// ============ Tasks ============

#[derive(Serialize)]
struct FailedTasksResponse {
    failed_tasks: Vec<TaskIntent>,
}

async fn handle_failed_tasks(State(state): State<AppState>) -> Json<FailedTasksResponse> {
    Json(FailedTasksResponse {
        failed_tasks: state.engine.failed_tasks(),
    })
}

#[derive(Serialize)]
struct RetryResponse {
    message: String,
    moved: usize,
}

async fn handle_retry_tasks(State(state): State<AppState>) -> Json<RetryResponse> {
    let moved = state.engine.retry_failed();
    let message = if moved == 0 {
        "No failed tasks to retry".to_string()
    } else {
        format!("Moved {} tasks back to the queue", moved)
    };
    Json(RetryResponse { message, moved })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"healthy"` when the server is running.
    status: &'static str,
    version: &'static str,
    #[serde(flatten)]
    queue: Status,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        queue: state.engine.status(),
    })
}
