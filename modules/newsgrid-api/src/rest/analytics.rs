//! Thin handlers over the document store: parse parameters, try the cache,
//! delegate, cache with an endpoint-specific TTL.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use newsgrid_docstore::{DocPost, PostBulkOp, SearchFilters};

use crate::error::{ApiError, ApiResult};
use crate::rest::json_body;
use crate::AppState;

/// Hot views refresh often; slow aggregates are worth keeping longer.
const HOT_TTL: u64 = 120;
const SEARCH_TTL: u64 = 300;
const AGGREGATE_TTL: u64 = 600;

const MATERIALIZE_TIMEOUT: Duration = Duration::from_secs(300);
const REPORT_TIMEOUT: Duration = Duration::from_secs(30);
const CHANNEL_REPORT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct DaysQuery {
    days: Option<i64>,
}

pub async fn advanced_search(
    State(state): State<Arc<AppState>>,
    Json(filters): Json<SearchFilters>,
) -> ApiResult<Response> {
    let cache_key = format!(
        "advanced_search:{}",
        serde_json::to_string(&filters).unwrap_or_default()
    );
    if let Some(hit) = state.cache.get(&cache_key).await {
        return Ok(json_body(hit));
    }

    let results = state.docs.advanced_search(&filters, 20).await?;

    let body = results.to_string();
    state.cache.set_ex(&cache_key, &body, SEARCH_TTL).await;
    Ok(json_body(body))
}

pub async fn top_tags(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Response> {
    let limit = query.limit.unwrap_or(10).clamp(1, 500);

    let cache_key = format!("cache:top_tags:{limit}");
    if let Some(hit) = state.cache.get(&cache_key).await {
        return Ok(json_body(hit));
    }

    let results = state.docs.get_top_tags(limit).await?;

    let body = serde_json::to_string(&results)
        .map_err(|e| ApiError::stage("encode top tags", e))?;
    state.cache.set_ex(&cache_key, &body, AGGREGATE_TTL).await;
    Ok(json_body(body))
}

pub async fn engagement(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<Response> {
    let days = query.days.unwrap_or(30).clamp(1, 365);

    let cache_key = format!("cache:engagement:{days}");
    if let Some(hit) = state.cache.get(&cache_key).await {
        return Ok(json_body(hit));
    }

    let summary = state.docs.get_post_engagement_analysis(days).await?;

    let body = serde_json::to_string(&summary)
        .map_err(|e| ApiError::stage("encode engagement", e))?;
    state.cache.set_ex(&cache_key, &body, SEARCH_TTL).await;
    Ok(json_body(body))
}

pub async fn channel_performance(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let cache_key = "cache:channel_performance";
    if let Some(hit) = state.cache.get(cache_key).await {
        return Ok(json_body(hit));
    }

    let results = state.docs.get_channel_performance().await?;

    let body = serde_json::to_string(&results)
        .map_err(|e| ApiError::stage("encode channel performance", e))?;
    state.cache.set_ex(cache_key, &body, AGGREGATE_TTL).await;
    Ok(json_body(body))
}

pub async fn user_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Response> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let cache_key = format!("user_history:{user_id}:{limit}");
    if let Some(hit) = state.cache.get(&cache_key).await {
        return Ok(json_body(hit));
    }

    let history = state.docs.get_user_history(&user_id, limit).await?;

    let body = history.to_string();
    state.cache.set_ex(&cache_key, &body, SEARCH_TTL).await;
    Ok(json_body(body))
}

pub async fn record_interaction(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Response> {
    let post_id = payload
        .get("post_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::BadRequest("interaction: post_id is required".to_string()))?;
    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("interaction: action is required".to_string()))?;

    state
        .docs
        .record_user_interaction(&user_id, post_id, action)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "interaction recorded" })),
    )
        .into_response())
}

pub async fn top_posts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Response> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);

    let cache_key = format!("cache:top_posts_view:{limit}");
    if let Some(hit) = state.cache.get(&cache_key).await {
        return Ok(json_body(hit));
    }

    let results = state.docs.get_top_posts_from_view(limit).await?;

    let body = results.to_string();
    state.cache.set_ex(&cache_key, &body, HOT_TTL).await;
    Ok(json_body(body))
}

/// POST /api/mongo/posts/{post_id}/operations — multiplex the incremental
/// mirror updates on the `operation` field.
pub async fn post_operations(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
    Json(payload): Json<Value>,
) -> ApiResult<Response> {
    let operation = payload
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("operations: operation is required".to_string()))?;

    let reply = match operation {
        "increment_views" => {
            state.docs.increment_view_count(post_id).await?;
            json!({ "message": "views incremented" })
        }
        "add_tag" => {
            let tag = required_str(&payload, "tag")?;
            state.docs.add_tag_to_post(post_id, tag).await?;
            json!({ "message": "tag added" })
        }
        "remove_tag" => {
            let tag = required_str(&payload, "tag")?;
            state.docs.remove_tag_from_post(post_id, tag).await?;
            json!({ "message": "tag removed" })
        }
        "update_stats" => {
            let likes_delta = signed_delta(&payload, "likes_delta")?;
            let comments_delta = signed_delta(&payload, "comments_delta")?;
            state
                .docs
                .update_post_stats(post_id, likes_delta, comments_delta)
                .await?;
            json!({ "message": "stats updated" })
        }
        "upsert" => {
            let data = payload
                .get("data")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    ApiError::BadRequest("operations: data object is required".to_string())
                })?;
            let fields = mongodb::bson::to_document(data)
                .map_err(|e| ApiError::BadRequest(format!("operations: {e}")))?;
            let was_inserted = state.docs.upsert_post(post_id, fields).await?;
            json!({
                "message": if was_inserted { "post created" } else { "post updated" },
                "was_inserted": was_inserted,
            })
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "operations: unknown operation '{other}'"
            )));
        }
    };

    state.cache.del(&[&format!("cache:posts:{post_id}")]).await;

    Ok(Json(reply).into_response())
}

pub async fn materialize(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    tokio::time::timeout(MATERIALIZE_TIMEOUT, state.docs.materialize_top_posts_view())
        .await
        .map_err(|_| ApiError::Internal("materialize: timed out".to_string()))??;

    // Only after the rename commits may the cached snapshots go.
    state.cache.del_pattern("cache:top_posts_view:*").await;

    Ok(Json(json!({
        "message": "view materialized successfully",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
    .into_response())
}

pub async fn transactional_post(
    State(state): State<Arc<AppState>>,
    Json(post): Json<DocPost>,
) -> ApiResult<Response> {
    tokio::time::timeout(
        Duration::from_secs(10),
        state.docs.create_post_with_transaction(&post),
    )
    .await
    .map_err(|_| ApiError::Internal("transaction: timed out".to_string()))??;

    state
        .cache
        .del(&["cache:posts", "cache:channel_performance"])
        .await;
    state.cache.del_pattern("cache:top_posts_view:*").await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "post created via transaction",
            "post_id": post.post_id,
            "timestamp": chrono::Utc::now().timestamp(),
        })),
    )
        .into_response())
}

pub async fn bulk_posts(
    State(state): State<Arc<AppState>>,
    Json(ops): Json<Vec<PostBulkOp>>,
) -> ApiResult<Response> {
    if ops.is_empty() {
        return Err(ApiError::BadRequest("bulk: no operations provided".to_string()));
    }

    let counters = tokio::time::timeout(REPORT_TIMEOUT, state.docs.bulk_update_posts(ops))
        .await
        .map_err(|_| ApiError::Internal("bulk: timed out".to_string()))??;

    info!(
        inserted = counters.inserted,
        modified = counters.modified,
        deleted = counters.deleted,
        upserted = counters.upserted,
        matched = counters.matched,
        "Bulk post maintenance finished"
    );

    state.cache.del_pattern("cache:posts*").await;

    Ok(Json(json!({
        "message": "bulk operations completed",
        "inserted_count": counters.inserted,
        "modified_count": counters.modified,
        "deleted_count": counters.deleted,
        "upserted_count": counters.upserted,
        "matched_count": counters.matched,
    }))
    .into_response())
}

pub async fn weekly_report(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let cache_key = "cache:weekly_report";
    if let Some(hit) = state.cache.get(cache_key).await {
        return Ok(json_body(hit));
    }

    let report = tokio::time::timeout(REPORT_TIMEOUT, state.docs.get_weekly_report())
        .await
        .map_err(|_| ApiError::Internal("weekly report: timed out".to_string()))??;

    let body = serde_json::to_string(&report)
        .map_err(|e| ApiError::stage("encode weekly report", e))?;
    state.cache.set_ex(cache_key, &body, SEARCH_TTL).await;
    Ok(json_body(body))
}

/// GET /api/mongo/reports/channel-performance — same aggregate as the
/// analytics route, under its own cache key and the report time budget.
pub async fn channel_performance_report(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let cache_key = "cache:channel_performance_report";
    if let Some(hit) = state.cache.get(cache_key).await {
        return Ok(json_body(hit));
    }

    let results = tokio::time::timeout(
        CHANNEL_REPORT_TIMEOUT,
        state.docs.get_channel_performance(),
    )
    .await
    .map_err(|_| ApiError::Internal("channel report: timed out".to_string()))??;

    let body = serde_json::to_string(&results)
        .map_err(|e| ApiError::stage("encode channel report", e))?;
    state.cache.set_ex(cache_key, &body, AGGREGATE_TTL).await;
    Ok(json_body(body))
}

/// POST /api/mongo/validate/post — standalone business-rule validation of a
/// post document; nothing is written.
pub async fn validate_post(Json(post): Json<DocPost>) -> Response {
    let errors = post_validation_errors(&post);
    if errors.is_empty() {
        Json(json!({
            "valid": true,
            "message": "post validation successful",
        }))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "valid": false, "errors": errors })),
        )
            .into_response()
    }
}

fn post_validation_errors(post: &DocPost) -> Vec<String> {
    let mut errors = Vec::new();

    if post.title.len() < 3 || post.title.len() > 500 {
        errors.push("title must be between 3 and 500 characters".to_string());
    }
    if post.content.len() < 10 || post.content.len() > 50_000 {
        errors.push("content must be between 10 and 50000 characters".to_string());
    }
    if post.tags.len() > 20 {
        errors.push("maximum 20 tags allowed".to_string());
    }
    if post.stats.views < 0
        || post.stats.likes < 0
        || post.stats.comments < 0
        || post.stats.shares < 0
    {
        errors.push("statistics cannot be negative".to_string());
    }
    if post.stats.likes > 1_000_000 {
        errors.push("likes cannot exceed 1,000,000".to_string());
    }
    if post.comments.len() > 1000 {
        errors.push("maximum 1000 comments allowed".to_string());
    }

    errors
}

pub async fn cached_channels(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Response> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);

    let reports = state.docs.get_cached_channel_reports(limit).await?;
    let count = reports.as_array().map(Vec::len).unwrap_or(0);

    Ok(Json(json!({
        "data": reports,
        "count": count,
        "cached": true,
        "updated_at": chrono::Utc::now().timestamp(),
    }))
    .into_response())
}

pub async fn refresh_cache(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    tokio::time::timeout(REPORT_TIMEOUT, state.docs.materialize_channel_reports())
        .await
        .map_err(|_| ApiError::Internal("refresh: timed out".to_string()))??;

    state.cache.del_pattern("cache:*").await;

    Ok(Json(json!({
        "message": "cache refreshed successfully",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
    .into_response())
}

fn required_str<'a>(payload: &'a Value, key: &str) -> ApiResult<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest(format!("operations: {key} is required")))
}

/// Deltas may arrive as integers or JSON floats; both collapse to i64.
fn signed_delta(payload: &Value, key: &str) -> ApiResult<i64> {
    match payload.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| ApiError::BadRequest(format!("operations: {key} out of range"))),
        _ => Err(ApiError::BadRequest(format!(
            "operations: {key} is required"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_delta_accepts_negative_and_float() {
        assert_eq!(signed_delta(&json!({"d": -3}), "d").unwrap(), -3);
        assert_eq!(signed_delta(&json!({"d": 2.0}), "d").unwrap(), 2);
        assert!(signed_delta(&json!({"d": "x"}), "d").is_err());
        assert!(signed_delta(&json!({}), "d").is_err());
    }

    #[test]
    fn required_str_names_the_missing_key() {
        let err = required_str(&json!({}), "tag").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(m) if m.contains("tag")));
    }

    #[test]
    fn valid_post_passes_business_rules() {
        let post: DocPost = serde_json::from_value(json!({
            "post_id": 1, "title": "A fine title", "content": "long enough body", "channel_id": 2,
        }))
        .unwrap();
        assert!(post_validation_errors(&post).is_empty());
    }

    #[test]
    fn short_title_and_negative_stats_are_reported_together() {
        let post: DocPost = serde_json::from_value(json!({
            "post_id": 1, "title": "ab", "content": "long enough body", "channel_id": 2,
            "stats": { "views": -1, "likes": 0, "comments": 0, "shares": 0 },
        }))
        .unwrap();
        let errors = post_validation_errors(&post);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("title")));
        assert!(errors.iter().any(|e| e.contains("negative")));
    }

    #[test]
    fn tag_and_likes_limits_are_enforced() {
        let tags: Vec<String> = (0..21).map(|i| format!("t{i}")).collect();
        let post: DocPost = serde_json::from_value(json!({
            "post_id": 1, "title": "A fine title", "content": "long enough body", "channel_id": 2,
            "tags": tags,
            "stats": { "views": 0, "likes": 2_000_000, "comments": 0, "shares": 0 },
        }))
        .unwrap();
        let errors = post_validation_errors(&post);
        assert!(errors.iter().any(|e| e.contains("20 tags")));
        assert!(errors.iter().any(|e| e.contains("1,000,000")));
    }
}
