//! `api` crate — HTTP layer over the engine's control surface.
//!
//! Routes:
//!
//! ```text
//!   POST   /api/v1/workflows
//!   POST   /api/v1/workflows/validate
//!   GET    /api/v1/workflows
//!   GET    /api/v1/workflows/{id}
//!   DELETE /api/v1/workflows/{id}
//!   POST   /api/v1/workflows/{id}/execute
//!   GET    /api/v1/executions/{id}
//!   POST   /api/v1/executions/{id}/pause
//!   POST   /api/v1/executions/{id}/resume
//!   POST   /api/v1/executions/{id}/terminate
//!   POST   /api/v1/webhooks
//!   *      /webhook/{path}
//! ```

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{any, delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use engine::WorkflowEngine;

use handlers::AppState;

/// Build the application router.
pub fn router(engine: Arc<WorkflowEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/api/v1/workflows", post(handlers::workflows::create))
        .route("/api/v1/workflows", get(handlers::workflows::list))
        .route(
            "/api/v1/workflows/validate",
            post(handlers::workflows::validate),
        )
        .route("/api/v1/workflows/{id}", get(handlers::workflows::get_one))
        .route(
            "/api/v1/workflows/{id}",
            delete(handlers::workflows::delete_one),
        )
        .route(
            "/api/v1/workflows/{id}/execute",
            post(handlers::executions::execute),
        )
        .route(
            "/api/v1/executions/{id}",
            get(handlers::executions::get_one),
        )
        .route(
            "/api/v1/executions/{id}/pause",
            post(handlers::executions::pause),
        )
        .route(
            "/api/v1/executions/{id}/resume",
            post(handlers::executions::resume),
        )
        .route(
            "/api/v1/executions/{id}/terminate",
            post(handlers::executions::terminate),
        )
        .route("/api/v1/webhooks", post(handlers::webhooks::bind))
        .route("/webhook/{path}", any(handlers::webhooks::ingress))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(bind: &str, engine: Arc<WorkflowEngine>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "API server listening");
    axum::serve(listener, router(engine)).await
}
