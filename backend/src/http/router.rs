//! Router configuration for the HTTP API.
//!
//! Sets up the routes and middleware (CORS, compression, tracing).

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

/// Create the main application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        .route("/classes", get(handlers::list_classes))
        // Analysis jobs
        .route("/analyses", post(handlers::start_analysis))
        .route(
            "/jobs/{job_id}",
            get(handlers::get_job_status).delete(handlers::cancel_job),
        )
        .route("/jobs/{job_id}/logs", get(handlers::stream_job_logs))
        // Direct analyses
        .route("/classification", post(handlers::classify))
        .route("/trends", post(handlers::class_trends))
        .route("/forest-change", post(handlers::forest_change))
        .route("/candidates", post(handlers::date_candidates))
        // Maintenance
        .route("/cache", delete(handlers::clear_cache))
        .route("/weather", get(handlers::weather));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1", api_v1)
        // Drawn boundaries can carry many vertices.
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
