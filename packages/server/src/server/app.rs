//! Application setup and router assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use serde::Serialize;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api::routes;
use crate::kernel::RuntimeKernel;

#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<RuntimeKernel>,
}

/// Build the tool-call router over an assembled kernel.
pub fn build_app(kernel: Arc<RuntimeKernel>) -> Router {
    let state = AppState { kernel };

    Router::new()
        .route("/health", get(health_handler))
        .route("/tools/create_task", post(routes::create_task))
        .route("/tools/queue_targets", post(routes::queue_targets))
        .route(
            "/tools/queue_reference_candidates",
            post(routes::queue_reference_candidates),
        )
        .route("/tools/get_status", post(routes::get_status))
        .route("/tools/get_auth_queue", post(routes::get_auth_queue))
        .route("/tools/resolve_auth", post(routes::resolve_auth))
        .route("/tools/stop_task", post(routes::stop_task))
        .route("/tools/query_view", post(routes::query_view))
        .route("/tools/query_sql", post(routes::query_sql))
        .route("/tools/vector_search", post(routes::vector_search))
        .route("/tools/feedback", post(routes::feedback))
        .layer(TraceLayer::new_for_http())
        // get_status may wait server-side; the layer bound sits above the
        // maximum wait the handler allows.
        .layer(TimeoutLayer::new(Duration::from_secs(150)))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    connection_pool: ConnectionPoolHealth,
}

#[derive(Serialize)]
struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ConnectionPoolHealth {
    size: u32,
    idle_connections: usize,
}

/// Health check: database connectivity and pool utilization.
///
/// Returns 200 OK when healthy, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pool = state.kernel.store.pool();
    let database = match tokio::time::timeout(
        Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(pool),
    )
    .await
    {
        Ok(Ok(_)) => DatabaseHealth {
            status: "ok".to_string(),
            error: None,
        },
        Ok(Err(e)) => DatabaseHealth {
            status: "error".to_string(),
            error: Some(format!("query failed: {e}")),
        },
        Err(_) => DatabaseHealth {
            status: "error".to_string(),
            error: Some("query timeout (>5s)".to_string()),
        },
    };

    let connection_pool = ConnectionPoolHealth {
        size: pool.size(),
        idle_connections: pool.num_idle(),
    };

    let healthy = database.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status_code,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            database,
            connection_pool,
        }),
    )
}
