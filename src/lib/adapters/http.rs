use std::{any::Any, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State, rejection::PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Serialize;
use serde_json::json;
use tokio::net;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument, warn};

use crate::core::{Title, Todo, TodoError, TodoPatch, json_object};
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub status: &'static str,
    pub id: i64,
}

/// Reports `degraded` instead of failing when the store is unreachable, so
/// the process stays up while the database is down.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = match state.storage.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            warn!(error = %e, "health check could not reach the database");
            "degraded"
        }
    };
    Json(HealthResponse { status })
}

pub async fn list_todos(State(state): State<AppState>) -> Result<Json<Vec<Todo>>, TodoError> {
    Ok(Json(state.storage.list_todos().await?))
}

#[instrument(skip_all)]
pub async fn create_todo(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Todo>), TodoError> {
    let title = Title::from_create_body(&json_object(&body))?;
    let todo = state.storage.create_todo(title).await?;
    info!(id = todo.id, "todo created");
    Ok((StatusCode::CREATED, Json(todo)))
}

#[instrument(skip(state, path, body))]
pub async fn update_todo(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    body: Bytes,
) -> Result<Json<Todo>, TodoError> {
    let id = todo_id(path)?;
    let patch = TodoPatch::from_body(&json_object(&body));
    let todo = state.storage.update_todo(id, patch).await?;
    info!(id, completed = todo.completed, "todo updated");
    Ok(Json(todo))
}

#[instrument(skip(state, path))]
pub async fn delete_todo(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<DeletedResponse>, TodoError> {
    let id = todo_id(path)?;
    state.storage.delete_todo(id).await?;
    info!(id, "todo deleted");
    Ok(Json(DeletedResponse {
        status: "deleted",
        id,
    }))
}

/// A path segment that is not an integer cannot name a todo.
fn todo_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, TodoError> {
    path.map(|Path(id)| id).map_err(|_| TodoError::NotFound)
}

async fn not_found() -> TodoError {
    TodoError::NotFound
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "method_not_allowed" })),
    )
        .into_response()
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal_error" })),
    )
        .into_response()
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/todos", get(list_todos).post(create_todo))
        .route("/todos/{id}", put(update_todo).delete(delete_todo))
        .method_not_allowed_fallback(method_not_allowed)
}

/// Builds the full application: `/api` routes plus tracing, CORS and panic
/// layers.
pub fn router(storage: Arc<dyn Storage>) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::extract::Request<_>| {
            let uri = request.uri().to_string();
            tracing::info_span!("http_request", method = ?request.method(), uri)
        });

    Router::new()
        .nest("/api", api_routes())
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(AppState { storage })
}

pub struct HttpServer {
    router: Router,
    listener: net::TcpListener,
}

impl HttpServer {
    pub async fn new(storage: Arc<dyn Storage>, addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;
        Ok(Self {
            router: router(storage),
            listener,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until Ctrl-C or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "HTTP server started");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("received error from running server")?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
