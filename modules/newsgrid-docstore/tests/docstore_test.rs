//! Integration tests for the document mirror.
//! Requires a MongoDB instance. Set MONGODB_TEST_URI or these tests are skipped.

use newsgrid_common::content_hash;
use newsgrid_docstore::{DocStore, DocStoreError, SearchFilters};

fn test_uri() -> Option<String> {
    std::env::var("MONGODB_TEST_URI").ok()
}

fn unique_post_id() -> i64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    (nanos % i64::MAX as u128) as i64
}

#[tokio::test]
async fn indexed_content_is_detected_as_duplicate() {
    let Some(uri) = test_uri() else {
        eprintln!("skipping: MONGODB_TEST_URI not set");
        return;
    };
    let store = DocStore::connect(&uri, "english").await.expect("connect");

    let post_id = unique_post_id();
    let title = format!("title-{post_id}");
    let hash = content_hash(&title, "body");

    assert!(!store.is_duplicate_content(&hash).await.unwrap());

    store
        .index_post(post_id, &title, "body", &["one".into(), "two".into()])
        .await
        .expect("index post");

    assert!(store.is_duplicate_content(&hash).await.unwrap());

    // A second insert with the same content trips the unique hash index.
    let err = store
        .index_post(post_id + 1, &title, "body", &[])
        .await
        .expect_err("duplicate hash must be rejected");
    assert!(matches!(err, DocStoreError::Duplicate(_)));

    store.remove_post_index(post_id).await.expect("remove");
    assert!(!store.is_duplicate_content(&hash).await.unwrap());
}

#[tokio::test]
async fn upsert_is_idempotent_and_keeps_insert_only_fields() {
    let Some(uri) = test_uri() else {
        eprintln!("skipping: MONGODB_TEST_URI not set");
        return;
    };
    let store = DocStore::connect(&uri, "english").await.expect("connect");

    let post_id = unique_post_id();
    let fields = mongodb::bson::doc! { "title": "upserted", "content": "c" };

    let first = store.upsert_post(post_id, fields.clone()).await.unwrap();
    assert!(first, "first upsert inserts");

    let second = store.upsert_post(post_id, fields).await.unwrap();
    assert!(!second, "second upsert updates in place");

    // Stats stayed at their insert-time zeros; incrementing works from there.
    store.increment_view_count(post_id).await.unwrap();
    store.remove_post_index(post_id).await.unwrap();
}

#[tokio::test]
async fn advanced_search_filters_by_tags_and_likes() {
    let Some(uri) = test_uri() else {
        eprintln!("skipping: MONGODB_TEST_URI not set");
        return;
    };
    let store = DocStore::connect(&uri, "english").await.expect("connect");

    let post_id = unique_post_id();
    let marker = format!("marker-{post_id}");
    store
        .index_post(post_id, &format!("title-{post_id}"), "body", &[marker.clone()])
        .await
        .expect("index post");

    let filters = SearchFilters {
        tags: vec![marker.clone()],
        ..Default::default()
    };
    let hits = store.advanced_search(&filters, 20).await.unwrap();
    let hits = hits.as_array().cloned().unwrap_or_default();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["post_id"].as_i64(), Some(post_id));

    // min_likes above zero excludes the fresh post.
    let filters = SearchFilters {
        tags: vec![marker],
        min_likes: Some(1),
        ..Default::default()
    };
    let hits = store.advanced_search(&filters, 20).await.unwrap();
    assert!(hits.as_array().map(Vec::is_empty).unwrap_or(true));

    store.remove_post_index(post_id).await.unwrap();
}
