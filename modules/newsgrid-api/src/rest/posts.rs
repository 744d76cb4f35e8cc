//! The specialized post write path: posts live across three relational
//! tables plus the document mirror, so the generic CRUD machinery is
//! bypassed for them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use newsgrid_common::{content_hash, time::parse_timestamp};
use newsgrid_store::validate_insert;

use crate::error::{ApiError, ApiResult};
use crate::rest::json_body;
use crate::AppState;

const FULL_VIEW_TTL: u64 = 600;

#[derive(Debug, Deserialize)]
struct NewPost {
    title: String,
    content: String,
    author_id: i64,
    channel_id: i64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    comments_count: Option<i64>,
    #[serde(default)]
    likes_count: Option<i64>,
    #[serde(default)]
    created_at: Option<String>,
}

/// POST /api/posts — insert news_texts, posts and post_tags in one
/// transaction, then fan out to the document mirror.
pub async fn create_post(state: &AppState, payload: Value) -> ApiResult<Response> {
    let post: NewPost = serde_json::from_value(payload)
        .map_err(|e| ApiError::BadRequest(format!("post payload: {e}")))?;

    let created_at = match &post.created_at {
        Some(raw) => parse_timestamp(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("post payload: unrecognized created_at '{raw}'"))
        })?,
        None => Utc::now(),
    };

    // Cross-store dedup before any relational work. A failed check degrades
    // to "not a duplicate": the unique hash index still backstops the insert.
    let hash = content_hash(&post.title, &post.content);
    match state.docs.is_duplicate_content(&hash).await {
        Ok(true) => {
            return Err(ApiError::Conflict(
                "duplicate content: a post with this title and content already exists".to_string(),
            ));
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, "Duplicate-content check failed, continuing"),
    }

    let mut conn = state.pool.acquire(false).await?;
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| ApiError::stage("begin", e))?;

    let text_id: i64 = sqlx::query_scalar(
        "INSERT INTO news_texts (text) VALUES ($1) RETURNING text_id::bigint",
    )
    .bind(&post.content)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::stage("insert news_texts", e))?;

    let mut check = Map::new();
    check.insert("title".to_string(), json!(post.title));
    check.insert("text_id".to_string(), json!(text_id));
    check.insert("author_id".to_string(), json!(post.author_id));
    check.insert("created_at".to_string(), json!(created_at.to_rfc3339()));
    validate_insert(&mut *tx, "posts", &check).await?;

    let row: Value = sqlx::query_scalar(
        "INSERT INTO posts AS t \
             (title, author_id, text_id, channel_id, comments_count, likes_count, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING to_jsonb(t)",
    )
    .bind(&post.title)
    .bind(post.author_id)
    .bind(text_id)
    .bind(post.channel_id)
    .bind(post.comments_count.unwrap_or(0))
    .bind(post.likes_count.unwrap_or(0))
    .bind(created_at)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::stage("insert posts", e))?;

    let post_id = row
        .get("post_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::Internal("insert posts: row without post_id".to_string()))?;

    attach_tags(&mut tx, post_id, &post.tags).await?;

    tx.commit()
        .await
        .map_err(|e| ApiError::stage("commit", e))?;

    // Mirror fan-out is best effort: a 201 here does not imply the document
    // copy exists yet.
    let docs = state.docs.clone();
    let (title, content, tags) = (post.title.clone(), post.content.clone(), post.tags.clone());
    tokio::spawn(async move {
        if let Err(e) = docs.index_post(post_id, &title, &content, &tags).await {
            warn!(post_id, error = %e, "Post mirror write failed");
        }
    });

    state
        .cache
        .del(&[
            "cache:posts",
            "cache:posts:full",
            "cache:news_texts",
            "cache:tags",
            "cache:post_tags",
        ])
        .await;

    let mut composed = row;
    if let Some(fields) = composed.as_object_mut() {
        fields.insert("content".to_string(), json!(post.content));
        fields.insert("tags".to_string(), json!(post.tags));
    }

    Ok((StatusCode::CREATED, Json(composed)).into_response())
}

/// GET /api/posts/{id} — the joined view: post columns, author name, body,
/// channel name and the aggregated tag array.
pub async fn read_post_full(state: &AppState, post_id: i64) -> ApiResult<Response> {
    let cache_key = format!("cache:posts:full:{post_id}");
    if let Some(hit) = state.cache.get(&cache_key).await {
        return Ok(json_body(hit));
    }

    let mut conn = state.pool.acquire(true).await?;
    let row: Option<Value> = sqlx::query_scalar(
        "SELECT to_jsonb(x) FROM ( \
             SELECT p.*, \
                    a.name AS author_name, \
                    nt.text AS content, \
                    c.name AS channel_name, \
                    COALESCE(array_agg(t.name) FILTER (WHERE t.name IS NOT NULL), '{}') AS tags \
             FROM posts p \
             JOIN authors a ON a.author_id = p.author_id \
             JOIN news_texts nt ON nt.text_id = p.text_id \
             JOIN channels c ON c.channel_id = p.channel_id \
             LEFT JOIN post_tags pt ON pt.post_id = p.post_id \
             LEFT JOIN tags t ON t.tag_id = pt.tag_id \
             WHERE p.post_id = $1 \
             GROUP BY p.post_id, a.name, nt.text, c.name \
         ) x",
    )
    .bind(post_id)
    .fetch_optional(conn.as_conn())
    .await
    .map_err(|e| ApiError::stage("select posts", e))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound(format!("post {post_id} not found")));
    };

    let body = row.to_string();
    state.cache.set_ex(&cache_key, &body, FULL_VIEW_TTL).await;

    Ok(json_body(body))
}

/// PUT /api/posts/{id} — update the body in news_texts when `content` is
/// present, the post columns for other keys, and replace the post_tags rows
/// when `tags` is present.
pub async fn update_post(state: &AppState, post_id: i64, payload: Value) -> ApiResult<Response> {
    let Some(fields) = payload.as_object().filter(|f| !f.is_empty()) else {
        return Err(ApiError::BadRequest("payload: no fields provided".to_string()));
    };

    let mut conn = state.pool.acquire(false).await?;
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| ApiError::stage("begin", e))?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT post_id::bigint FROM posts WHERE post_id = $1")
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ApiError::stage("select posts", e))?;
    if exists.is_none() {
        return Err(ApiError::NotFound(format!("post {post_id} not found")));
    }

    if let Some(content) = fields.get("content").and_then(Value::as_str) {
        sqlx::query(
            "UPDATE news_texts SET text = $1 \
             WHERE text_id = (SELECT text_id FROM posts WHERE post_id = $2)",
        )
        .bind(content)
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::stage("update news_texts", e))?;
    }

    let column_fields: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| key.as_str() != "content" && key.as_str() != "tags")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !column_fields.is_empty() {
        for key in column_fields.keys() {
            if !crate::tables::is_valid_identifier(key) {
                return Err(ApiError::BadRequest(format!("invalid column name '{key}'")));
            }
        }
        let assignments: Vec<String> = column_fields
            .keys()
            .map(|c| format!("{c} = r.{c}"))
            .collect();
        let sql = format!(
            "UPDATE posts AS t SET {} FROM jsonb_populate_record(NULL::posts, $1::jsonb) AS r \
             WHERE t.post_id = $2",
            assignments.join(", ")
        );
        sqlx::query(&sql)
            .bind(Value::Object(column_fields))
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::stage("update posts", e))?;
    }

    if let Some(tags) = fields.get("tags").and_then(Value::as_array) {
        let names: Vec<String> = tags
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect();
        sqlx::query("DELETE FROM post_tags WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::stage("delete post_tags", e))?;
        attach_tags(&mut tx, post_id, &names).await?;
    }

    // Post-update snapshot: the response body and the mirror fan-out both
    // use the actual stored values, not whatever subset the client sent.
    let snapshot: Value = sqlx::query_scalar(
        "SELECT to_jsonb(x) FROM ( \
             SELECT p.post_id, p.title, nt.text AS content, \
                    COALESCE(array_agg(t.name) FILTER (WHERE t.name IS NOT NULL), '{}') AS tags \
             FROM posts p \
             JOIN news_texts nt ON nt.text_id = p.text_id \
             LEFT JOIN post_tags pt ON pt.post_id = p.post_id \
             LEFT JOIN tags t ON t.tag_id = pt.tag_id \
             WHERE p.post_id = $1 \
             GROUP BY p.post_id, p.title, nt.text \
         ) x",
    )
    .bind(post_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::stage("select posts", e))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::stage("commit", e))?;

    let title = snapshot.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
    let content = snapshot.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
    let tags: Vec<String> = snapshot
        .get("tags")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let docs = state.docs.clone();
    tokio::spawn(async move {
        if let Err(e) = docs.update_post_index(post_id, &title, &content, &tags).await {
            warn!(post_id, error = %e, "Post mirror update failed");
        }
    });

    state
        .cache
        .del(&[
            "cache:posts",
            &format!("cache:posts:{post_id}"),
            &format!("cache:posts:full:{post_id}"),
            "cache:news_texts",
            "cache:tags",
            "cache:post_tags",
        ])
        .await;

    Ok(Json(snapshot).into_response())
}

/// DELETE /api/posts/{id} — drop post_tags rows then the post row.
/// The news_texts row stays: bodies may be shared between posts.
pub async fn delete_post(state: &AppState, post_id: i64) -> ApiResult<Response> {
    let docs = state.docs.clone();
    tokio::spawn(async move {
        if let Err(e) = docs.remove_post_index(post_id).await {
            warn!(post_id, error = %e, "Post mirror removal failed");
        }
    });

    let mut conn = state.pool.acquire(false).await?;
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| ApiError::stage("begin", e))?;

    sqlx::query("DELETE FROM post_tags WHERE post_id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::stage("delete post_tags", e))?;

    let result = sqlx::query("DELETE FROM posts WHERE post_id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::stage("delete posts", e))?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("post {post_id} not found")));
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::stage("commit", e))?;

    state
        .cache
        .del(&[
            "cache:posts",
            &format!("cache:posts:{post_id}"),
            &format!("cache:posts:full:{post_id}"),
            "cache:post_tags",
        ])
        .await;

    Ok(Json(json!({ "message": "post deleted" })).into_response())
}

/// Upsert each tag by name and link it to the post; the link insert is a
/// set-insert via ON CONFLICT DO NOTHING.
async fn attach_tags(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    post_id: i64,
    tags: &[String],
) -> ApiResult<()> {
    for name in tags {
        let tag_id: i64 = sqlx::query_scalar(
            "INSERT INTO tags (name) VALUES ($1) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
             RETURNING tag_id::bigint",
        )
        .bind(name)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| ApiError::stage("upsert tags", e))?;

        sqlx::query(
            "INSERT INTO post_tags (post_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(post_id)
        .bind(tag_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| ApiError::stage("insert post_tags", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_requires_title_content_author_channel() {
        let err = serde_json::from_value::<NewPost>(json!({
            "title": "T", "author_id": 1, "channel_id": 1
        }))
        .unwrap_err();
        assert!(err.to_string().contains("content"));
    }

    #[test]
    fn optional_fields_default() {
        let post: NewPost = serde_json::from_value(json!({
            "title": "T", "content": "C", "author_id": 1, "channel_id": 2
        }))
        .unwrap();
        assert!(post.tags.is_empty());
        assert!(post.comments_count.is_none());
        assert!(post.created_at.is_none());
    }

    #[test]
    fn tags_parse_as_string_array() {
        let post: NewPost = serde_json::from_value(json!({
            "title": "T", "content": "C", "author_id": 1, "channel_id": 2,
            "tags": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(post.tags, vec!["a", "b"]);
    }
}
