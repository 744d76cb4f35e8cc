//! Generic table CRUD: allow-listed tables, runtime-shaped payloads.
//!
//! Payload values never enter statement text; each write binds the whole
//! payload as one jsonb parameter and lets `jsonb_populate_record` convert
//! fields to the column types. Only validated column names are spliced in.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};

use newsgrid_store::validate_insert;

use crate::error::{ApiError, ApiResult};
use crate::rest::{json_body, posts};
use crate::tables::{is_valid_identifier, is_valid_table, primary_key};
use crate::AppState;

const LIST_TTL: u64 = 300;
const ITEM_TTL: u64 = 600;

pub async fn create_row(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Response> {
    check_table(&table)?;

    // Posts span three tables and the document mirror.
    if table == "posts" {
        return posts::create_post(&state, payload).await;
    }

    let fields = require_fields(&payload)?;
    let columns = validated_columns(fields)?;
    let sql = build_insert_sql(&table, &columns);

    let mut conn = state.pool.acquire(false).await?;
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| ApiError::stage("begin", e))?;

    validate_insert(&mut *tx, &table, fields).await?;

    let row: Value = sqlx::query_scalar(&sql)
        .bind(Value::Object(fields.clone()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ApiError::stage(&format!("insert {table}"), e))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::stage("commit", e))?;

    state.cache.del(&[&format!("cache:{table}")]).await;

    Ok(Json(row).into_response())
}

pub async fn list_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> ApiResult<Response> {
    check_table(&table)?;

    let cache_key = format!("cache:{table}");
    if let Some(hit) = state.cache.get(&cache_key).await {
        return Ok(json_body(hit));
    }

    let mut conn = state.pool.acquire(true).await?;
    let sql = format!("SELECT COALESCE(jsonb_agg(to_jsonb(t)), '[]'::jsonb) FROM {table} AS t");
    let rows: Value = sqlx::query_scalar(&sql)
        .fetch_one(conn.as_conn())
        .await
        .map_err(|e| ApiError::stage(&format!("select {table}"), e))?;

    let body = rows.to_string();
    state.cache.set_ex(&cache_key, &body, LIST_TTL).await;

    Ok(json_body(body))
}

pub async fn read_row(
    State(state): State<Arc<AppState>>,
    Path((table, id)): Path<(String, String)>,
) -> ApiResult<Response> {
    check_table(&table)?;

    // Posts get the joined author/content/channel/tags view.
    if table == "posts" {
        return posts::read_post_full(&state, parse_id(&id)?).await;
    }

    let pk = simple_pk(&table)?;
    let id = parse_id(&id)?;

    let cache_key = format!("cache:{table}:{id}");
    if let Some(hit) = state.cache.get(&cache_key).await {
        return Ok(json_body(hit));
    }

    let mut conn = state.pool.acquire(true).await?;
    let sql = format!("SELECT to_jsonb(t) FROM {table} AS t WHERE {pk} = $1");
    let row: Option<Value> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(conn.as_conn())
        .await
        .map_err(|e| ApiError::stage(&format!("select {table}"), e))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound(format!("{table} {id} not found")));
    };

    let body = row.to_string();
    state.cache.set_ex(&cache_key, &body, ITEM_TTL).await;

    Ok(json_body(body))
}

pub async fn update_row(
    State(state): State<Arc<AppState>>,
    Path((table, id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> ApiResult<Response> {
    check_table(&table)?;

    if table == "posts" {
        return posts::update_post(&state, parse_id(&id)?, payload).await;
    }

    let pk = simple_pk(&table)?;
    let id = parse_id(&id)?;
    let fields = require_fields(&payload)?;
    let columns = validated_columns(fields)?;
    let sql = build_update_sql(&table, &columns, pk);

    let mut conn = state.pool.acquire(false).await?;
    let row: Option<Value> = sqlx::query_scalar(&sql)
        .bind(Value::Object(fields.clone()))
        .bind(id)
        .fetch_optional(conn.as_conn())
        .await
        .map_err(|e| ApiError::stage(&format!("update {table}"), e))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound(format!("{table} {id} not found")));
    };

    state
        .cache
        .del(&[&format!("cache:{table}"), &format!("cache:{table}:{id}")])
        .await;

    Ok(Json(row).into_response())
}

pub async fn delete_row(
    State(state): State<Arc<AppState>>,
    Path((table, id)): Path<(String, String)>,
) -> ApiResult<Response> {
    check_table(&table)?;

    if table == "posts" {
        return posts::delete_post(&state, parse_id(&id)?).await;
    }

    let pk = simple_pk(&table)?;
    let id = parse_id(&id)?;

    let mut conn = state.pool.acquire(false).await?;
    let sql = format!("DELETE FROM {table} WHERE {pk} = $1");
    let result = sqlx::query(&sql)
        .bind(id)
        .execute(conn.as_conn())
        .await
        .map_err(|e| ApiError::stage(&format!("delete {table}"), e))?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("{table} {id} not found")));
    }

    state
        .cache
        .del(&[&format!("cache:{table}"), &format!("cache:{table}:{id}")])
        .await;

    Ok(Json(serde_json::json!({ "message": "item deleted" })).into_response())
}

// --- post_tags composite-key routes ---

pub async fn read_composite(
    State(state): State<Arc<AppState>>,
    Path((table, id, id2)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let (post_id, tag_id) = composite_ids(&table, &id, &id2)?;

    let cache_key = format!("cache:post_tags:{post_id}:{tag_id}");
    if let Some(hit) = state.cache.get(&cache_key).await {
        return Ok(json_body(hit));
    }

    let mut conn = state.pool.acquire(true).await?;
    let row: Option<Value> = sqlx::query_scalar(
        "SELECT to_jsonb(t) FROM post_tags AS t WHERE post_id = $1 AND tag_id = $2",
    )
    .bind(post_id)
    .bind(tag_id)
    .fetch_optional(conn.as_conn())
    .await
    .map_err(|e| ApiError::stage("select post_tags", e))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound(format!(
            "post_tags ({post_id}, {tag_id}) not found"
        )));
    };

    let body = row.to_string();
    state.cache.set_ex(&cache_key, &body, ITEM_TTL).await;

    Ok(json_body(body))
}

pub async fn update_composite(
    State(state): State<Arc<AppState>>,
    Path((table, id, id2)): Path<(String, String, String)>,
    Json(payload): Json<Value>,
) -> ApiResult<Response> {
    let (post_id, tag_id) = composite_ids(&table, &id, &id2)?;
    let fields = require_fields(&payload)?;
    let columns = validated_columns(fields)?;

    let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = r.{c}")).collect();
    let sql = format!(
        "UPDATE post_tags AS t SET {} FROM jsonb_populate_record(NULL::post_tags, $1::jsonb) AS r \
         WHERE t.post_id = $2 AND t.tag_id = $3 RETURNING to_jsonb(t)",
        assignments.join(", ")
    );

    let mut conn = state.pool.acquire(false).await?;
    let row: Option<Value> = sqlx::query_scalar(&sql)
        .bind(Value::Object(fields.clone()))
        .bind(post_id)
        .bind(tag_id)
        .fetch_optional(conn.as_conn())
        .await
        .map_err(|e| ApiError::stage("update post_tags", e))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound(format!(
            "post_tags ({post_id}, {tag_id}) not found"
        )));
    };

    state
        .cache
        .del(&[
            "cache:post_tags",
            &format!("cache:post_tags:{post_id}:{tag_id}"),
        ])
        .await;

    Ok(Json(row).into_response())
}

pub async fn delete_composite(
    State(state): State<Arc<AppState>>,
    Path((table, id, id2)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let (post_id, tag_id) = composite_ids(&table, &id, &id2)?;

    let mut conn = state.pool.acquire(false).await?;
    let result = sqlx::query("DELETE FROM post_tags WHERE post_id = $1 AND tag_id = $2")
        .bind(post_id)
        .bind(tag_id)
        .execute(conn.as_conn())
        .await
        .map_err(|e| ApiError::stage("delete post_tags", e))?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!(
            "post_tags ({post_id}, {tag_id}) not found"
        )));
    }

    state
        .cache
        .del(&[
            "cache:post_tags",
            &format!("cache:post_tags:{post_id}:{tag_id}"),
        ])
        .await;

    Ok(Json(serde_json::json!({ "message": "item deleted" })).into_response())
}

// --- helpers ---

fn check_table(table: &str) -> ApiResult<()> {
    if is_valid_table(table) {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("unknown table '{table}'")))
    }
}

fn simple_pk(table: &str) -> ApiResult<&'static str> {
    primary_key(table)
        .ok_or_else(|| ApiError::BadRequest(format!("table '{table}' has no simple primary key")))
}

fn parse_id(raw: &str) -> ApiResult<i64> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id '{raw}'")))
}

fn composite_ids(table: &str, id: &str, id2: &str) -> ApiResult<(i64, i64)> {
    if table != "post_tags" {
        return Err(ApiError::NotFound(format!(
            "table '{table}' has no composite key route"
        )));
    }
    Ok((parse_id(id)?, parse_id(id2)?))
}

fn require_fields(payload: &Value) -> ApiResult<&Map<String, Value>> {
    payload
        .as_object()
        .filter(|fields| !fields.is_empty())
        .ok_or_else(|| ApiError::BadRequest("payload: no fields provided".to_string()))
}

fn validated_columns(fields: &Map<String, Value>) -> ApiResult<Vec<String>> {
    fields
        .keys()
        .map(|key| {
            if is_valid_identifier(key) {
                Ok(key.clone())
            } else {
                Err(ApiError::BadRequest(format!("invalid column name '{key}'")))
            }
        })
        .collect()
}

/// Insert through `jsonb_populate_record` so Postgres converts every json
/// field to its column type; only the named columns are written, leaving
/// serial defaults intact.
fn build_insert_sql(table: &str, columns: &[String]) -> String {
    let column_list = columns.join(", ");
    let select_list: Vec<String> = columns.iter().map(|c| format!("r.{c}")).collect();
    format!(
        "INSERT INTO {table} AS t ({column_list}) \
         SELECT {select_list} FROM jsonb_populate_record(NULL::{table}, $1::jsonb) AS r \
         RETURNING to_jsonb(t)",
        select_list = select_list.join(", ")
    )
}

fn build_update_sql(table: &str, columns: &[String], pk: &str) -> String {
    let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = r.{c}")).collect();
    format!(
        "UPDATE {table} AS t SET {} FROM jsonb_populate_record(NULL::{table}, $1::jsonb) AS r \
         WHERE t.{pk} = $2 RETURNING to_jsonb(t)",
        assignments.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_sql_names_only_payload_columns() {
        let sql = build_insert_sql("authors", &["name".to_string()]);
        assert_eq!(
            sql,
            "INSERT INTO authors AS t (name) \
             SELECT r.name FROM jsonb_populate_record(NULL::authors, $1::jsonb) AS r \
             RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn update_sql_pins_the_primary_key() {
        let sql = build_update_sql(
            "channels",
            &["name".to_string(), "topic".to_string()],
            "channel_id",
        );
        assert!(sql.contains("SET name = r.name, topic = r.topic"));
        assert!(sql.ends_with("WHERE t.channel_id = $2 RETURNING to_jsonb(t)"));
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(require_fields(&json!({})).is_err());
        assert!(require_fields(&json!([1, 2])).is_err());
        assert!(require_fields(&json!({"a": 1})).is_ok());
    }

    #[test]
    fn hostile_column_names_never_reach_sql() {
        let fields = json!({"name; --": "x"});
        let err = validated_columns(fields.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn composite_route_is_post_tags_only() {
        assert!(composite_ids("post_tags", "1", "2").is_ok());
        assert!(composite_ids("comments", "1", "2").is_err());
        assert!(composite_ids("post_tags", "1", "x").is_err());
    }
}
