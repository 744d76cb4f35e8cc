//! Mirror maintenance: one document per relational post, plus the atomic
//! single-document stat updates.

use mongodb::bson::{doc, DateTime, Document};
use mongodb::options::UpdateOptions;

use newsgrid_common::content_hash;

use crate::{is_duplicate_key, DocStore, DocStoreError, Result};

impl DocStore {
    /// Insert the mirror document for a freshly committed relational post.
    /// Stats start at zero; `content_hash` enforces cross-store dedup.
    pub async fn index_post(
        &self,
        post_id: i64,
        title: &str,
        content: &str,
        tags: &[String],
    ) -> Result<()> {
        let now = DateTime::now();
        let document = doc! {
            "post_id": post_id,
            "title": title,
            "content": content,
            "content_hash": content_hash(title, content),
            "tags": tags.to_vec(),
            "stats": { "views": 0_i64, "likes": 0_i64, "comments": 0_i64, "shares": 0_i64 },
            "comments": [],
            "created_at": now,
            "updated_at": now,
        };

        self.posts().insert_one(document).await.map_err(|e| {
            if is_duplicate_key(&e) {
                DocStoreError::Duplicate(format!("post {post_id} or its content already indexed"))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    /// Re-point the mirror document at new content, recomputing the hash.
    pub async fn update_post_index(
        &self,
        post_id: i64,
        title: &str,
        content: &str,
        tags: &[String],
    ) -> Result<()> {
        let update = doc! {
            "$set": {
                "title": title,
                "content": content,
                "content_hash": content_hash(title, content),
                "tags": tags.to_vec(),
                "updated_at": DateTime::now(),
            }
        };

        self.posts()
            .update_one(doc! { "post_id": post_id }, update)
            .await?;
        Ok(())
    }

    pub async fn remove_post_index(&self, post_id: i64) -> Result<()> {
        self.posts()
            .delete_one(doc! { "post_id": post_id })
            .await?;
        Ok(())
    }

    /// Existence test on the content hash; drives the 409 on duplicate posts.
    pub async fn is_duplicate_content(&self, hash: &str) -> Result<bool> {
        let count = self
            .posts()
            .count_documents(doc! { "content_hash": hash })
            .await?;
        Ok(count > 0)
    }

    // --- incremental statistics ---

    pub async fn increment_view_count(&self, post_id: i64) -> Result<()> {
        self.posts()
            .update_one(
                doc! { "post_id": post_id },
                doc! { "$inc": { "stats.views": 1_i64 } },
            )
            .await?;
        Ok(())
    }

    /// Set-insert: adding a tag twice leaves a single entry.
    pub async fn add_tag_to_post(&self, post_id: i64, tag: &str) -> Result<()> {
        self.posts()
            .update_one(
                doc! { "post_id": post_id },
                doc! { "$addToSet": { "tags": tag } },
            )
            .await?;
        Ok(())
    }

    pub async fn remove_tag_from_post(&self, post_id: i64, tag: &str) -> Result<()> {
        self.posts()
            .update_one(
                doc! { "post_id": post_id },
                doc! { "$pull": { "tags": tag } },
            )
            .await?;
        Ok(())
    }

    /// Apply signed deltas to likes and comments in one round trip.
    pub async fn update_post_stats(
        &self,
        post_id: i64,
        likes_delta: i64,
        comments_delta: i64,
    ) -> Result<()> {
        self.posts()
            .update_one(
                doc! { "post_id": post_id },
                doc! { "$inc": {
                    "stats.likes": likes_delta,
                    "stats.comments": comments_delta,
                } },
            )
            .await?;
        Ok(())
    }

    /// Insert-or-update in one round trip. `created_at` and the zeroed stats
    /// block apply only on insert, so re-upserting the same post never
    /// resets them. Returns true when a document was inserted.
    pub async fn upsert_post(&self, post_id: i64, fields: Document) -> Result<bool> {
        let mut set = fields;
        // These are insert-only; strip them so $set never collides with
        // $setOnInsert on the same path.
        set.remove("created_at");
        set.remove("stats");
        set.remove("_id");
        set.insert("post_id", post_id);
        set.insert("updated_at", DateTime::now());

        let update = doc! {
            "$set": set,
            "$setOnInsert": {
                "created_at": DateTime::now(),
                "stats": { "views": 0_i64, "likes": 0_i64, "comments": 0_i64, "shares": 0_i64 },
            },
        };

        let result = self
            .posts()
            .update_one(doc! { "post_id": post_id }, update)
            .with_options(UpdateOptions::builder().upsert(true).build())
            .await?;

        Ok(result.upserted_id.is_some())
    }
}
