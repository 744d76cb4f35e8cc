//! Multi-document writes: the post-creation session transaction and the
//! mixed bulk maintenance pass.

use mongodb::bson::{doc, to_document, DateTime};
use mongodb::options::{
    DeleteManyModel, InsertOneModel, ReadConcern, ReadPreference, ReplaceOneModel,
    SelectionCriteria, TransactionOptions, UpdateManyModel, UpdateModifications, UpdateOneModel,
    WriteConcern, WriteModel,
};
use mongodb::ClientSession;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{is_duplicate_key, DocStore, DocStoreError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocStats {
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub comments: i64,
    #[serde(default)]
    pub shares: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocComment {
    pub comment_id: i64,
    pub nickname: String,
    pub text: String,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<i64>,
}

/// A post document as submitted to the transactional create path.
/// Timestamps are stamped server-side on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocPost {
    pub post_id: i64,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub channel_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub comments: Vec<DocComment>,
    #[serde(default)]
    pub stats: DocStats,
}

/// One entry of a bulk maintenance request. Each variant maps onto one
/// write model; a single request may mix all of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PostBulkOp {
    /// Insert a new post document.
    Insert { post: DocPost },
    /// `$inc` view/like counters on one post.
    BumpStats {
        post_id: i64,
        #[serde(default)]
        views: i64,
        #[serde(default)]
        likes: i64,
    },
    /// Mark every post carrying a tag as trending.
    MarkTrending { tag: String },
    /// Drop posts older than the cutoff that never found an audience.
    PruneStale {
        older_than_days: i64,
        max_views: i64,
    },
    /// Replace a post document wholesale, inserting if absent.
    Replace { post: DocPost },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BulkCounters {
    pub inserted: i64,
    pub modified: i64,
    pub deleted: i64,
    pub upserted: i64,
    pub matched: i64,
}

impl DocStore {
    /// Create a post and its denormalized side-effects in one transaction:
    /// the document insert, the channel's post counter and last-post date,
    /// and the usage counter of every referenced tag. All three land
    /// together or not at all.
    pub async fn create_post_with_transaction(&self, post: &DocPost) -> Result<()> {
        let mut session = self.client().start_session().await?;

        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::majority())
            .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .build();
        session.start_transaction().with_options(options).await?;

        match self.create_post_steps(post, &mut session).await {
            Ok(()) => {
                session.commit_transaction().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!(error = %abort_err, "Failed to abort post transaction");
                }
                Err(e)
            }
        }
    }

    async fn create_post_steps(
        &self,
        post: &DocPost,
        session: &mut ClientSession,
    ) -> Result<()> {
        let now = DateTime::now();

        let mut document = to_document(post)?;
        document.insert("created_at", now);
        document.insert("updated_at", now);

        self.posts()
            .insert_one(document)
            .session(&mut *session)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    DocStoreError::Duplicate(format!("post {} already exists", post.post_id))
                } else {
                    e.into()
                }
            })?;

        self.channels()
            .update_one(
                doc! { "channel_id": post.channel_id },
                doc! {
                    "$inc": { "post_count": 1 },
                    "$set": { "last_post_date": now },
                },
            )
            .session(&mut *session)
            .await?;

        if !post.tags.is_empty() {
            self.tags()
                .update_many(
                    doc! { "name": { "$in": &post.tags } },
                    doc! { "$inc": { "usage_count": 1 } },
                )
                .session(&mut *session)
                .await?;
        }

        Ok(())
    }

    /// Run a mixed, unordered bulk write over the post collection and
    /// surface the per-operation counters.
    pub async fn bulk_update_posts(&self, ops: Vec<PostBulkOp>) -> Result<BulkCounters> {
        let namespace = self.posts().namespace();
        let now = DateTime::now();

        let mut models: Vec<WriteModel> = Vec::with_capacity(ops.len());
        for op in ops {
            let model = match op {
                PostBulkOp::Insert { post } => {
                    let mut document = to_document(&post)?;
                    document.insert("created_at", now);
                    document.insert("updated_at", now);
                    WriteModel::InsertOne(
                        InsertOneModel::builder()
                            .namespace(namespace.clone())
                            .document(document)
                            .build(),
                    )
                }
                PostBulkOp::BumpStats {
                    post_id,
                    views,
                    likes,
                } => WriteModel::UpdateOne(
                    UpdateOneModel::builder()
                        .namespace(namespace.clone())
                        .filter(doc! { "post_id": post_id })
                        .update(UpdateModifications::Document(doc! {
                            "$inc": { "stats.views": views, "stats.likes": likes },
                            "$set": { "updated_at": now },
                        }))
                        .build(),
                ),
                PostBulkOp::MarkTrending { tag } => WriteModel::UpdateMany(
                    UpdateManyModel::builder()
                        .namespace(namespace.clone())
                        .filter(doc! { "tags": tag })
                        .update(UpdateModifications::Document(doc! {
                            "$set": { "trending": true, "updated_at": now },
                        }))
                        .build(),
                ),
                PostBulkOp::PruneStale {
                    older_than_days,
                    max_views,
                } => {
                    let cutoff = DateTime::from_chrono(
                        chrono::Utc::now() - chrono::Duration::days(older_than_days),
                    );
                    WriteModel::DeleteMany(
                        DeleteManyModel::builder()
                            .namespace(namespace.clone())
                            .filter(doc! {
                                "created_at": { "$lt": cutoff },
                                "stats.views": { "$lt": max_views },
                            })
                            .build(),
                    )
                }
                PostBulkOp::Replace { post } => {
                    let mut document = to_document(&post)?;
                    document.insert("created_at", now);
                    document.insert("updated_at", now);
                    WriteModel::ReplaceOne(
                        ReplaceOneModel::builder()
                            .namespace(namespace.clone())
                            .filter(doc! { "post_id": post.post_id })
                            .replacement(document)
                            .upsert(true)
                            .build(),
                    )
                }
            };
            models.push(model);
        }

        let result = self
            .client()
            .bulk_write(models)
            .ordered(false)
            .await?;

        Ok(BulkCounters {
            inserted: result.inserted_count,
            modified: result.modified_count,
            deleted: result.deleted_count,
            upserted: result.upserted_count,
            matched: result.matched_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn doc_post_defaults_fill_optional_fields() {
        let post: DocPost = serde_json::from_value(json!({
            "post_id": 1,
            "title": "T",
            "channel_id": 2,
        }))
        .unwrap();
        assert_eq!(post.content, "");
        assert!(post.tags.is_empty());
        assert_eq!(post.stats.views, 0);
        assert!(post.author_id.is_none());
    }

    #[test]
    fn bulk_ops_parse_from_tagged_json() {
        let ops: Vec<PostBulkOp> = serde_json::from_value(json!([
            { "op": "bump_stats", "post_id": 1, "views": 100, "likes": 5 },
            { "op": "mark_trending", "tag": "tech" },
            { "op": "prune_stale", "older_than_days": 365, "max_views": 100 },
            { "op": "insert", "post": { "post_id": 9, "title": "B", "channel_id": 1 } },
            { "op": "replace", "post": { "post_id": 10, "title": "R", "channel_id": 2 } },
        ]))
        .unwrap();
        assert_eq!(ops.len(), 5);
        assert!(matches!(ops[0], PostBulkOp::BumpStats { post_id: 1, views: 100, likes: 5 }));
        assert!(matches!(&ops[2], PostBulkOp::PruneStale { older_than_days: 365, max_views: 100 }));
    }

    #[test]
    fn unknown_bulk_op_is_rejected() {
        let parsed: std::result::Result<Vec<PostBulkOp>, _> =
            serde_json::from_value(json!([{ "op": "drop_everything" }]));
        assert!(parsed.is_err());
    }

    #[test]
    fn doc_post_serializes_without_null_author() {
        let post = DocPost {
            post_id: 1,
            title: "T".into(),
            content: "C".into(),
            channel_id: 2,
            author_id: None,
            tags: vec![],
            comments: vec![],
            stats: DocStats::default(),
        };
        let document = to_document(&post).unwrap();
        assert!(!document.contains_key("author_id"));
        assert!(document.get_document("stats").unwrap().contains_key("views"));
    }
}
