//! HTTP router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.

use std::sync::Arc;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api::endpoints;
use crate::api::types::ApiContext;
use crate::pipeline::TransformPipeline;

/// Build the API router around a shared pipeline.
pub fn api_router(pipeline: Arc<TransformPipeline>) -> Router {
    build_router(ApiContext::new(pipeline))
}

fn build_router(ctx: ApiContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/transform", post(endpoints::transform::transform))
        .route(
            "/transform/stream",
            post(endpoints::transform::transform_stream),
        )
        .with_state(ctx);

    Router::new().nest("/api", api).layer(cors)
}
