//! Axum router construction.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
///
/// Fixed paths take precedence over the `/{name}` media route, so a media
/// file named like a management endpoint is not reachable by name.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let management = Router::new()
        .route("/", get(routes::management::index))
        .route("/videos", get(routes::management::list_videos))
        .route("/status", get(routes::management::status))
        .route("/restart-rtsp", get(routes::management::restart_rtsp))
        .route("/streams/config", post(routes::management::configure_streams))
        .route("/streams/{id}/start", post(routes::management::start_stream))
        .route("/streams/{id}/stop", post(routes::management::stop_stream))
        .route("/relay/stop", post(routes::management::stop_relay))
        .route("/tasks/{id}", get(routes::tasks::get_task))
        .route("/tools", get(routes::tools::list_tools));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(management)
        .route("/{name}", get(routes::stream::serve_stream))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
