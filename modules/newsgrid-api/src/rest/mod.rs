pub mod analytics;
pub mod crud;
pub mod posts;

use std::sync::Arc;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Document-store surface
        .route("/api/mongo/search/advanced", post(analytics::advanced_search))
        .route("/api/mongo/analytics/top-tags", get(analytics::top_tags))
        .route("/api/mongo/analytics/engagement", get(analytics::engagement))
        .route("/api/mongo/analytics/channels", get(analytics::channel_performance))
        .route("/api/mongo/user/:user_id/history", get(analytics::user_history))
        .route(
            "/api/mongo/user/:user_id/interactions",
            post(analytics::record_interaction),
        )
        .route("/api/mongo/top-posts", get(analytics::top_posts))
        .route(
            "/api/mongo/posts/:post_id/operations",
            post(analytics::post_operations),
        )
        .route("/api/mongo/materialize", post(analytics::materialize))
        .route("/api/mongo/transaction/post", post(analytics::transactional_post))
        .route("/api/mongo/bulk/posts", post(analytics::bulk_posts))
        .route("/api/mongo/reports/weekly", get(analytics::weekly_report))
        .route(
            "/api/mongo/reports/channel-performance",
            get(analytics::channel_performance_report),
        )
        .route("/api/mongo/validate/post", post(analytics::validate_post))
        .route("/api/mongo/cache/channels", get(analytics::cached_channels))
        .route("/api/mongo/cache/refresh", post(analytics::refresh_cache))
        // Generic CRUD; static /api/mongo routes take precedence over :table
        .route("/api/:table", post(crud::create_row).get(crud::list_rows))
        .route(
            "/api/:table/:id",
            get(crud::read_row).put(crud::update_row).delete(crud::delete_row),
        )
        .route(
            "/api/:table/:id/:id2",
            get(crud::read_composite)
                .put(crud::update_composite)
                .delete(crud::delete_composite),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Serve an already-serialized JSON string (typically a cache hit).
pub(crate) fn json_body(payload: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], payload).into_response()
}
