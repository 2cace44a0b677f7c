//! HTTP route handlers and router configuration

mod admin;
mod documents;
mod schema;
mod search;

use crate::state::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the main application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors_enabled = state.config.cors_enabled;

    let mut router = Router::new()
        // Health check
        .route("/health", get(admin::health))
        // Index-level endpoints (static segments win over :id)
        .route("/:index", post(documents::post_document))
        .route("/:index/_search", post(search::search))
        .route(
            "/:index/_schema",
            get(schema::get_schema).put(schema::put_schema),
        )
        .route("/:index/_stats", get(admin::stats))
        // Document endpoints
        .route(
            "/:index/:id",
            put(documents::put_document)
                .get(documents::get_document)
                .patch(documents::patch_document)
                .delete(documents::delete_document),
        )
        .with_state(state);

    router = router.layer(TraceLayer::new_for_http());

    if cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}
