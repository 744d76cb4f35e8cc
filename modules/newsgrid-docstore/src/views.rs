//! Materialized views rebuilt on a schedule and on demand.
//!
//! Rebuilds write into a temporary collection and then rename over the live
//! one server-side, so readers always observe either the previous snapshot
//! or the new one, never an empty collection. A cancelled rebuild dies
//! before the rename and leaves the live view untouched.

use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime, Document};
use mongodb::options::FindOptions;
use serde_json::Value;
use tracing::info;

use crate::json::docs_to_json;
use crate::{DocStore, Result, CACHED_CHANNEL_REPORTS, CHANNELS, TOP_POSTS_VIEW, TOP_POSTS_VIEW_TEMP};

/// Score used to rank the weekly top posts.
fn total_score_expr() -> Document {
    doc! {
        "$add": [
            { "$multiply": ["$stats.likes", 3] },
            { "$multiply": ["$stats.comments", 2] },
            { "$multiply": ["$stats.views", 0.5] },
        ],
    }
}

impl DocStore {
    /// Rebuild `top_posts_view`: viewed posts from the last 7 days, scored
    /// `3·likes + 2·comments + 0.5·views`, top 100.
    pub async fn materialize_top_posts_view(&self) -> Result<()> {
        let cutoff = DateTime::from_chrono(chrono::Utc::now() - chrono::Duration::days(7));

        let pipeline = vec![
            doc! { "$match": {
                "created_at": { "$gte": cutoff },
                "stats.views": { "$gt": 0 },
            } },
            doc! { "$addFields": { "total_score": total_score_expr() } },
            doc! { "$sort": { "total_score": -1 } },
            doc! { "$limit": 100 },
            doc! { "$out": TOP_POSTS_VIEW_TEMP },
        ];

        let cursor = self.posts().aggregate(pipeline).await?;
        let _: Vec<Document> = cursor.try_collect().await?;

        // Swap the snapshot in. dropTarget makes the rename replace the
        // live collection in a single server-side step.
        let db = self.db().name();
        self.admin_db()
            .run_command(doc! {
                "renameCollection": format!("{db}.{TOP_POSTS_VIEW_TEMP}"),
                "to": format!("{db}.{TOP_POSTS_VIEW}"),
                "dropTarget": true,
            })
            .await?;

        info!("top_posts_view rebuilt");
        Ok(())
    }

    pub async fn get_top_posts_from_view(&self, limit: i64) -> Result<Value> {
        let cursor = self
            .db()
            .collection::<Document>(TOP_POSTS_VIEW)
            .find(doc! {})
            .with_options(
                FindOptions::builder()
                    .limit(limit)
                    .sort(doc! { "total_score": -1 })
                    .build(),
            )
            .await?;
        let results: Vec<Document> = cursor.try_collect().await?;
        Ok(docs_to_json(results))
    }

    /// Rebuild `cached_channel_reports`: a per-channel aggregate joined with
    /// the channels collection, emitted with `$out`.
    pub async fn materialize_channel_reports(&self) -> Result<()> {
        let pipeline = vec![
            doc! { "$lookup": {
                "from": CHANNELS,
                "localField": "channel_id",
                "foreignField": "channel_id",
                "as": "channel",
            } },
            doc! { "$unwind": "$channel" },
            doc! { "$group": {
                "_id": "$channel_id",
                "channel_name": { "$first": "$channel.name" },
                "total_posts": { "$sum": 1 },
                "total_views": { "$sum": "$stats.views" },
                "total_likes": { "$sum": "$stats.likes" },
                "avg_likes_per_post": { "$avg": "$stats.likes" },
                "top_tags": { "$push": "$tags" },
                "last_post_date": { "$max": "$created_at" },
            } },
            doc! { "$project": {
                "channel_id": "$_id",
                "channel_name": 1,
                "total_posts": 1,
                "total_views": 1,
                "total_likes": 1,
                "avg_likes_per_post": { "$round": ["$avg_likes_per_post", 2] },
                // Flatten the per-post tag arrays into one deduplicated set,
                // keeping at most 10.
                "top_tags": { "$slice": [
                    { "$reduce": {
                        "input": "$top_tags",
                        "initialValue": [],
                        "in": { "$setUnion": ["$$value", "$$this"] },
                    } },
                    10,
                ] },
                "last_post_date": 1,
                "engagement_rate": { "$round": [
                    { "$multiply": [
                        { "$divide": [
                            "$total_likes",
                            { "$max": ["$total_views", 1] },
                        ] },
                        100,
                    ] },
                    2,
                ] },
                "cached_at": DateTime::now(),
                "_id": 0,
            } },
            doc! { "$out": CACHED_CHANNEL_REPORTS },
        ];

        let cursor = self.posts().aggregate(pipeline).await?;
        let _: Vec<Document> = cursor.try_collect().await?;

        info!("cached_channel_reports rebuilt");
        Ok(())
    }

    pub async fn get_cached_channel_reports(&self, limit: i64) -> Result<Value> {
        let cursor = self
            .db()
            .collection::<Document>(CACHED_CHANNEL_REPORTS)
            .find(doc! {})
            .with_options(
                FindOptions::builder()
                    .limit(limit)
                    .sort(doc! { "engagement_rate": -1 })
                    .build(),
            )
            .await?;
        let results: Vec<Document> = cursor.try_collect().await?;
        Ok(docs_to_json(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_weights_match_the_ranking_contract() {
        let expr = total_score_expr();
        let terms = expr.get_array("$add").unwrap();
        assert_eq!(terms.len(), 3);
        let weights: Vec<f64> = terms
            .iter()
            .map(|t| {
                let factors = t.as_document().unwrap().get_array("$multiply").unwrap();
                match &factors[1] {
                    mongodb::bson::Bson::Int32(i) => *i as f64,
                    mongodb::bson::Bson::Int64(i) => *i as f64,
                    mongodb::bson::Bson::Double(f) => *f,
                    other => panic!("unexpected weight {other:?}"),
                }
            })
            .collect();
        assert_eq!(weights, vec![3.0, 2.0, 0.5]);
    }
}
