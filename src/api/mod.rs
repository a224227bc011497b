//! REST API of the hub
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Liveness plus repository health (no auth)
//! - `GET /api/v1/overview` - Sentinel summaries of all monitors
//! - `GET /api/v1/overview/:id` - One summary with its recent reports
//! - `GET /api/v1/monitors/:id/availability` - Persisted rollups
//! - `GET /api/v1/tasks` - Scheduled tasks
//! - `GET /api/v1/tasks/:id` - One task
//! - `PUT /api/v1/tasks` - Create or replace a monitor and (re)schedule it
//! - `DELETE /api/v1/tasks/:id` - Delete a monitor and unschedule it
//! - `POST /api/v1/tasks/:id/probe` - Run a probe now
//! - `POST /api/v1/agents/:agent_id/reports` - Agent ingestion

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ApiConfig;

/// Router with all routes, without binding anything
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut protected = Router::new()
        .route("/api/v1/overview", get(routes::overview::overview))
        .route("/api/v1/overview/:id", get(routes::overview::monitor_detail))
        .route(
            "/api/v1/monitors/:id/availability",
            get(routes::overview::availability),
        )
        .route(
            "/api/v1/tasks",
            get(routes::tasks::list_tasks).put(routes::tasks::upsert_task),
        )
        .route(
            "/api/v1/tasks/:id",
            get(routes::tasks::get_task).delete(routes::tasks::delete_task),
        )
        .route("/api/v1/tasks/:id/probe", post(routes::tasks::trigger_probe))
        .route(
            "/api/v1/agents/:agent_id/reports",
            post(routes::agents::ingest_reports),
        );

    if let Some(token) = config.auth_token.as_deref() {
        protected = protected.layer(axum::middleware::from_fn_with_state(
            middleware::auth::HubToken::new(token),
            middleware::auth::auth_middleware,
        ));
    }

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server in a background task
///
/// Returns the address actually bound, so port 0 can be used in tests.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
