//! Integration tests for the split pool and the validator registry.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use serde_json::{json, Map, Value};

use newsgrid_store::{migrate, validate_insert, SplitPool, StoreError};

fn test_url() -> Option<String> {
    std::env::var("DATABASE_TEST_URL").ok()
}

fn bag(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

fn unique_suffix() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}

#[tokio::test]
async fn primary_only_pool_serves_both_roles() {
    let Some(url) = test_url() else {
        eprintln!("skipping: DATABASE_TEST_URL not set");
        return;
    };

    let pool = SplitPool::connect(&url, None, 4).await.expect("pool construction");
    migrate(pool.primary().expect("primary pool")).await.expect("migrations");

    let mut conn = pool.acquire(false).await.expect("write acquisition");
    assert!(!conn.is_replica());
    let one: i32 = sqlx::query_scalar("SELECT 1")
        .fetch_one(conn.as_conn())
        .await
        .unwrap();
    assert_eq!(one, 1);
    drop(conn);

    // Without a replica, read-only acquisition falls back to the primary.
    let conn = pool.acquire(true).await.expect("read acquisition");
    assert!(!conn.is_replica());
    drop(conn);

    pool.health_check().await;
    pool.close().await;
}

#[tokio::test]
async fn author_validator_rejects_duplicate_names() {
    let Some(url) = test_url() else {
        eprintln!("skipping: DATABASE_TEST_URL not set");
        return;
    };

    let pool = SplitPool::connect(&url, None, 4).await.expect("pool construction");
    migrate(pool.primary().expect("primary pool")).await.expect("migrations");

    let mut conn = pool.acquire(false).await.expect("acquire");
    // Everything stays inside one dropped transaction, leaving the database clean.
    let mut tx = conn.begin().await.expect("begin");

    let name = format!("author-{}", unique_suffix());
    sqlx::query("INSERT INTO authors (name) VALUES ($1)")
        .bind(&name)
        .execute(&mut *tx)
        .await
        .expect("insert author");

    let err = validate_insert(&mut *tx, "authors", &bag(json!({ "name": name })))
        .await
        .expect_err("duplicate must be rejected");
    assert!(matches!(err, StoreError::Rejected(ref m) if m.contains(&name)));

    let other = format!("author-{}", unique_suffix());
    validate_insert(&mut *tx, "authors", &bag(json!({ "name": other })))
        .await
        .expect("fresh name passes");
}

#[tokio::test]
async fn post_validator_enforces_the_minute_window() {
    let Some(url) = test_url() else {
        eprintln!("skipping: DATABASE_TEST_URL not set");
        return;
    };

    let pool = SplitPool::connect(&url, None, 4).await.expect("pool construction");
    migrate(pool.primary().expect("primary pool")).await.expect("migrations");

    let mut conn = pool.acquire(false).await.expect("acquire");
    let mut tx = conn.begin().await.expect("begin");

    let suffix = unique_suffix();
    let source_id: i64 = sqlx::query_scalar(
        "INSERT INTO sources (name, link) VALUES ($1, $2) RETURNING source_id::bigint",
    )
    .bind(format!("source-{suffix}"))
    .bind(format!("https://example.com/{suffix}"))
    .fetch_one(&mut *tx)
    .await
    .unwrap();
    let channel_id: i64 = sqlx::query_scalar(
        "INSERT INTO channels (name, source_id) VALUES ($1, $2) RETURNING channel_id::bigint",
    )
    .bind(format!("channel-{suffix}"))
    .bind(source_id)
    .fetch_one(&mut *tx)
    .await
    .unwrap();
    let author_id: i64 = sqlx::query_scalar(
        "INSERT INTO authors (name) VALUES ($1) RETURNING author_id::bigint",
    )
    .bind(format!("author-{suffix}"))
    .fetch_one(&mut *tx)
    .await
    .unwrap();
    let text_id: i64 = sqlx::query_scalar(
        "INSERT INTO news_texts (text) VALUES ('body') RETURNING text_id::bigint",
    )
    .fetch_one(&mut *tx)
    .await
    .unwrap();

    let created_at = chrono::Utc::now();
    sqlx::query(
        "INSERT INTO posts (title, author_id, text_id, channel_id, created_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind("A title")
    .bind(author_id)
    .bind(text_id)
    .bind(channel_id)
    .bind(created_at)
    .execute(&mut *tx)
    .await
    .unwrap();

    // 30 s later: inside the window, rejected.
    let near = (created_at + chrono::Duration::seconds(30)).to_rfc3339();
    let err = validate_insert(
        &mut *tx,
        "posts",
        &bag(json!({
            "title": "A title",
            "text_id": text_id,
            "author_id": author_id,
            "created_at": near,
        })),
    )
    .await
    .expect_err("same tuple within a minute must be rejected");
    assert!(matches!(err, StoreError::Rejected(_)));

    // Two minutes later: outside the window, passes.
    let far = (created_at + chrono::Duration::seconds(120)).to_rfc3339();
    validate_insert(
        &mut *tx,
        "posts",
        &bag(json!({
            "title": "A title",
            "text_id": text_id,
            "author_id": author_id,
            "created_at": far,
        })),
    )
    .await
    .expect("outside the window passes");
}
