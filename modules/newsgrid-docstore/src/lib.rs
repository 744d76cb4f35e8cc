//! Document mirror of the relational store: search surface, analytics
//! pipelines and the two materialized views.

pub mod json;
pub mod mirror;
pub mod report;
pub mod search;
pub mod txn;
pub mod views;
pub mod watcher;

use std::time::Duration;

use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{info, warn};

pub use search::SearchFilters;
pub use txn::{BulkCounters, DocPost, PostBulkOp};

pub type Result<T> = std::result::Result<T, DocStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum DocStoreError {
    /// A unique index rejected the write (post_id or content_hash).
    #[error("duplicate document: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Driver(#[from] mongodb::error::Error),

    #[error("document decode error: {0}")]
    Decode(#[from] mongodb::bson::de::Error),

    #[error("document encode error: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),
}

const DEFAULT_DB: &str = "news_aggregator";

pub const POSTS: &str = "posts";
pub const USER_INTERACTIONS: &str = "user_interactions";
pub const TAGS: &str = "tags";
pub const CHANNELS: &str = "channels";
pub const TOP_POSTS_VIEW: &str = "top_posts_view";
pub const TOP_POSTS_VIEW_TEMP: &str = "top_posts_view_temp";
pub const CACHED_CHANNEL_REPORTS: &str = "cached_channel_reports";

/// Documents older than a year fall out of the mirror via the TTL index.
const MIRROR_TTL_SECS: u64 = 31_536_000;

#[derive(Clone)]
pub struct DocStore {
    client: Client,
    db: Database,
    default_language: String,
}

#[derive(Debug)]
pub struct ReplicaSetHealth {
    pub ok: bool,
    pub members: usize,
    pub healthy_members: usize,
}

impl DocStore {
    /// Connect, ping, and ensure indexes.
    ///
    /// Index creation failures are logged and swallowed: a cold start
    /// against a read-only secondary must still be able to serve reads.
    pub async fn connect(uri: &str, default_language: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri).await?;
        options.max_pool_size = Some(50);
        options.min_pool_size = Some(10);
        options.max_idle_time = Some(Duration::from_secs(1800));

        let client = Client::with_options(options)?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DB));

        db.run_command(doc! { "ping": 1 }).await?;

        let store = Self {
            client,
            db,
            default_language: default_language.to_string(),
        };

        if let Err(e) = store.create_indexes().await {
            warn!(error = %e, "Failed to create document-store indexes");
        }

        info!(db = %store.db.name(), "Document store connected");
        Ok(store)
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn admin_db(&self) -> Database {
        self.client.database("admin")
    }

    pub(crate) fn posts(&self) -> Collection<Document> {
        self.db.collection(POSTS)
    }

    pub(crate) fn interactions(&self) -> Collection<Document> {
        self.db.collection(USER_INTERACTIONS)
    }

    pub(crate) fn tags(&self) -> Collection<Document> {
        self.db.collection(TAGS)
    }

    pub(crate) fn channels(&self) -> Collection<Document> {
        self.db.collection(CHANNELS)
    }

    async fn create_indexes(&self) -> Result<()> {
        let posts = self.posts();

        // Weighted full-text search over title, body and tags.
        posts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "title": "text", "content": "text", "tags": "text" })
                    .options(
                        IndexOptions::builder()
                            .weights(doc! { "title": 10, "content": 5, "tags": 3 })
                            .default_language(self.default_language.clone())
                            .build(),
                    )
                    .build(),
            )
            .await?;

        posts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "post_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        // Sparse: legacy documents without a hash stay valid.
        posts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "content_hash": 1 })
                    .options(IndexOptions::builder().unique(true).sparse(true).build())
                    .build(),
            )
            .await?;

        // Tag-filtered ranking.
        posts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tags": 1, "stats.likes": -1, "created_at": -1 })
                    .build(),
            )
            .await?;

        posts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "created_at": 1 })
                    .options(
                        IndexOptions::builder()
                            .expire_after(Duration::from_secs(MIRROR_TTL_SECS))
                            .build(),
                    )
                    .build(),
            )
            .await?;

        self.interactions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "timestamp": -1 })
                    .build(),
            )
            .await?;

        Ok(())
    }

    /// Summarize `replSetGetStatus` for the periodic health ticker.
    pub async fn check_replica_set_health(&self) -> Result<ReplicaSetHealth> {
        let status = self
            .client
            .database("admin")
            .run_command(doc! { "replSetGetStatus": 1 })
            .await?;

        let ok = match status.get("ok") {
            Some(value) => value.as_f64().unwrap_or(0.0) == 1.0 || value.as_i32() == Some(1),
            None => false,
        };
        let members = status.get_array("members").map(|m| m.len()).unwrap_or(0);
        let healthy_members = status
            .get_array("members")
            .map(|m| {
                m.iter()
                    .filter_map(|member| member.as_document())
                    .filter(|member| member.get("health").and_then(|h| h.as_f64()) == Some(1.0))
                    .count()
            })
            .unwrap_or(0);

        Ok(ReplicaSetHealth {
            ok,
            members,
            healthy_members,
        })
    }

    /// Disconnect, flushing driver resources. `shutdown` consumes a client;
    /// the handle is cloned so the store can be closed behind shared state.
    pub async fn close(&self) {
        self.client.clone().shutdown().await;
        info!("Document store closed");
    }
}

/// True when the driver error is a unique-index violation.
pub(crate) fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match &*error.kind {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        ErrorKind::Write(WriteFailure::WriteConcernError(_)) => false,
        ErrorKind::Command(ce) => ce.code == 11000,
        _ => false,
    }
}
