//! Per-table uniqueness checks run inside the insert transaction.
//!
//! The validator produces the diagnostic; the matching unique index in the
//! schema produces the correctness under concurrent inserters.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgConnection;

use newsgrid_common::time::parse_timestamp;

use crate::{Result, StoreError};

/// Dispatch to the validator registered for `table`. Tables without a
/// registered rule pass unconditionally.
pub async fn validate_insert(
    conn: &mut PgConnection,
    table: &str,
    data: &Map<String, Value>,
) -> Result<()> {
    match table {
        "users" => validate_user(conn, data).await,
        "authors" => validate_author(conn, data).await,
        "sources" => validate_source(conn, data).await,
        "channels" => validate_channel(conn, data).await,
        "posts" => validate_post(conn, data).await,
        _ => Ok(()),
    }
}

async fn validate_user(conn: &mut PgConnection, data: &Map<String, Value>) -> Result<()> {
    let username = get_str(data, "username")?;

    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
        .bind(username)
        .fetch_one(conn)
        .await?;

    if exists {
        return Err(StoreError::Rejected(format!(
            "user with username '{username}' already exists"
        )));
    }
    Ok(())
}

async fn validate_author(conn: &mut PgConnection, data: &Map<String, Value>) -> Result<()> {
    let name = get_str(data, "name")?;

    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM authors WHERE name = $1)")
        .bind(name)
        .fetch_one(conn)
        .await?;

    if exists {
        return Err(StoreError::Rejected(format!(
            "author with name '{name}' already exists"
        )));
    }
    Ok(())
}

async fn validate_source(conn: &mut PgConnection, data: &Map<String, Value>) -> Result<()> {
    let name = get_str(data, "name")?;
    let link = get_str(data, "link")?;

    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM sources WHERE name = $1 AND link = $2)",
    )
    .bind(name)
    .bind(link)
    .fetch_one(conn)
    .await?;

    if exists {
        return Err(StoreError::Rejected(format!(
            "source with name '{name}' and link '{link}' already exists"
        )));
    }
    Ok(())
}

async fn validate_channel(conn: &mut PgConnection, data: &Map<String, Value>) -> Result<()> {
    let name = get_str(data, "name")?;
    let source_id = get_i64(data, "source_id")?;

    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM channels WHERE name = $1 AND source_id = $2)",
    )
    .bind(name)
    .bind(source_id)
    .fetch_one(conn)
    .await?;

    if exists {
        return Err(StoreError::Rejected(format!(
            "channel with name '{name}' already exists for source {source_id}"
        )));
    }
    Ok(())
}

/// Posts collide when title, text and author match and the timestamps fall
/// within a ±60 s window of each other.
async fn validate_post(conn: &mut PgConnection, data: &Map<String, Value>) -> Result<()> {
    let title = get_str(data, "title")?;
    let text_id = get_i64(data, "text_id")?;
    let author_id = get_i64(data, "author_id")?;
    let created_at = get_time(data, "created_at")?;

    let window_start = created_at - Duration::seconds(60);
    let window_end = created_at + Duration::seconds(60);

    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM posts \
         WHERE title = $1 AND text_id = $2 AND author_id = $3 \
           AND created_at >= $4 AND created_at < $5",
    )
    .bind(title)
    .bind(text_id)
    .bind(author_id)
    .bind(window_start)
    .bind(window_end)
    .fetch_one(conn)
    .await?;

    if count > 0 {
        return Err(StoreError::Rejected(format!(
            "post with title '{title}', text {text_id} and author {author_id} \
             already exists within a minute of {created_at}"
        )));
    }
    Ok(())
}

// --- payload accessors ---

fn get_str<'a>(data: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    data.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| StoreError::Rejected(format!("field '{key}' is required and must be a string")))
}

fn get_i64(data: &Map<String, Value>, key: &str) -> Result<i64> {
    let value = data
        .get(key)
        .ok_or_else(|| StoreError::Rejected(format!("field '{key}' is required")))?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| StoreError::Rejected(format!("field '{key}' must be an integer"))),
        Value::String(s) => s
            .parse()
            .map_err(|_| StoreError::Rejected(format!("field '{key}' must be an integer"))),
        _ => Err(StoreError::Rejected(format!(
            "field '{key}' must be an integer"
        ))),
    }
}

fn get_time(data: &Map<String, Value>, key: &str) -> Result<DateTime<Utc>> {
    let raw = data
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| StoreError::Rejected(format!("field '{key}' is required")))?;
    parse_timestamp(raw)
        .ok_or_else(|| StoreError::Rejected(format!("field '{key}' has an unrecognized time format: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn get_i64_accepts_number_and_numeric_string() {
        let data = bag(json!({"a": 7, "b": "42"}));
        assert_eq!(get_i64(&data, "a").unwrap(), 7);
        assert_eq!(get_i64(&data, "b").unwrap(), 42);
    }

    #[test]
    fn get_i64_rejects_non_numeric() {
        let data = bag(json!({"a": [1]}));
        assert!(get_i64(&data, "a").is_err());
        assert!(get_i64(&data, "missing").is_err());
    }

    #[test]
    fn get_time_accepts_common_formats() {
        let data = bag(json!({
            "a": "2026-01-15T08:00:00Z",
            "b": "2026-01-15 08:00:00",
        }));
        assert_eq!(get_time(&data, "a").unwrap(), get_time(&data, "b").unwrap());
    }

    #[test]
    fn missing_string_field_names_the_key() {
        let data = bag(json!({}));
        let err = get_str(&data, "username").unwrap_err();
        assert!(err.to_string().contains("username"));
    }
}
