//! Axum router construction.

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/request-conversion/",
            post(routes::conversions::request_conversion),
        )
        .route(
            "/request-conversion",
            post(routes::conversions::request_conversion),
        )
        .route(
            "/get-conversion-status/{task_id}",
            get(routes::conversions::get_conversion_status),
        )
        .route(
            "/conversion/{task_id}",
            delete(routes::conversions::cancel_conversion),
        )
        .route("/files/{file_name}", get(routes::files::get_file))
        .route("/health", get(routes::admin::health))
        .route("/tools", get(routes::admin::tools))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(ctx)
}
