use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    let mut router = Router::new()
        // Albums
        .route("/albums", get(handlers::list_albums))
        .route(
            "/albums",
            post(handlers::create_album).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/albums/:id", delete(handlers::delete_album))
        .route("/albums/:id", get(handlers::get_album))
        .route(
            "/albums/:id",
            put(handlers::update_album).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/albums/:id/media", delete(handlers::delete_album_media))
        // Signed object URLs (local backend)
        .route("/objects/:bucket/*key", get(handlers::serve_object))
        // Internal
        .route("/_internal/health", get(handlers::health));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge and reconcile routes are available.");
        router = router
            .route("/admin/purge", delete(handlers::admin_purge))
            .route("/admin/reconcile", post(handlers::admin_reconcile));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
