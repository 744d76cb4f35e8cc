//! Search and aggregation pipelines over the post mirror.

use futures::TryStreamExt;
use mongodb::bson::{doc, from_document, DateTime, Document};
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json::{doc_to_json, docs_to_json};
use crate::{DocStore, Result};

/// Below this many interaction records a single `$lookup` join is cheaper
/// than two round trips; above it the join amplification wins.
const HISTORY_LOOKUP_CUTOFF: u64 = 50;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub min_likes: Option<i64>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
    pub total_likes: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngagementSummary {
    #[serde(default)]
    pub avg_engagement: f64,
    #[serde(default)]
    pub max_engagement: f64,
    #[serde(default)]
    pub posts_analyzed: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelPerformance {
    #[serde(rename = "_id")]
    pub channel_id: Option<i64>,
    pub post_count: i64,
    pub total_likes: i64,
    pub total_views: i64,
    pub avg_likes_per_post: Option<f64>,
}

/// Build the find filter for [`DocStore::advanced_search`].
/// `tags` is all-of, `exclude_tags` is none-of; both may apply at once.
fn build_search_filter(filters: &SearchFilters) -> Document {
    let mut tag_clause = Document::new();
    if !filters.tags.is_empty() {
        tag_clause.insert("$all", filters.tags.clone());
    }
    if !filters.exclude_tags.is_empty() {
        tag_clause.insert("$nin", filters.exclude_tags.clone());
    }

    let mut filter = Document::new();
    if !tag_clause.is_empty() {
        filter.insert("tags", tag_clause);
    }
    if let Some(min_likes) = filters.min_likes {
        if min_likes > 0 {
            filter.insert("stats.likes", doc! { "$gte": min_likes });
        }
    }
    filter
}

impl DocStore {
    /// Filtered search ordered by likes, projected to a narrow view.
    /// The `{tags, stats.likes, created_at}` compound index covers the
    /// tag-filtered case.
    pub async fn advanced_search(&self, filters: &SearchFilters, limit: i64) -> Result<Value> {
        let options = FindOptions::builder()
            .limit(limit)
            .sort(doc! { "stats.likes": -1 })
            .batch_size(100_u32)
            .projection(doc! { "post_id": 1, "title": 1, "tags": 1, "stats": 1, "_id": 0 })
            .build();

        let cursor = self
            .posts()
            .find(build_search_filter(filters))
            .with_options(options)
            .await?;
        let results: Vec<Document> = cursor.try_collect().await?;
        Ok(docs_to_json(results))
    }

    /// Unwind tags, group with usage count and accumulated likes, take the
    /// most used. Large limits are allowed to spill the group to disk.
    pub async fn get_top_tags(&self, limit: i64) -> Result<Vec<TagCount>> {
        let pipeline = vec![
            doc! { "$unwind": "$tags" },
            doc! { "$group": {
                "_id": "$tags",
                "count": { "$sum": 1 },
                "total_likes": { "$sum": "$stats.likes" },
            } },
            doc! { "$sort": { "count": -1 } },
            doc! { "$limit": limit },
            doc! { "$project": { "tag": "$_id", "count": 1, "total_likes": 1, "_id": 0 } },
        ];

        let posts = self.posts();
        let aggregate = posts.aggregate(pipeline);
        let cursor = if limit > 20 {
            aggregate.allow_disk_use(true).await?
        } else {
            aggregate.await?
        };
        let documents: Vec<Document> = cursor.try_collect().await?;
        documents
            .into_iter()
            .map(|d| from_document(d).map_err(Into::into))
            .collect()
    }

    /// Engagement over the last `days`: `(likes + comments) / max(views, 1)`
    /// averaged and maxed across the window.
    pub async fn get_post_engagement_analysis(&self, days: i64) -> Result<EngagementSummary> {
        let cutoff = DateTime::from_chrono(chrono::Utc::now() - chrono::Duration::days(days));

        let pipeline = vec![
            doc! { "$match": { "created_at": { "$gte": cutoff } } },
            doc! { "$addFields": {
                "engagement_rate": {
                    "$divide": [
                        { "$add": ["$stats.likes", "$stats.comments"] },
                        { "$max": ["$stats.views", 1] },
                    ],
                },
            } },
            doc! { "$group": {
                "_id": null,
                "avg_engagement": { "$avg": "$engagement_rate" },
                "max_engagement": { "$max": "$engagement_rate" },
                "posts_analyzed": { "$sum": 1 },
            } },
            doc! { "$project": { "_id": 0 } },
        ];

        let cursor = self.posts().aggregate(pipeline).await?;
        let mut documents: Vec<Document> = cursor.try_collect().await?;
        match documents.pop() {
            Some(d) => Ok(from_document(d)?),
            None => Ok(EngagementSummary::default()),
        }
    }

    /// All-time per-channel totals, top 10 channels by likes.
    pub async fn get_channel_performance(&self) -> Result<Vec<ChannelPerformance>> {
        let pipeline = vec![
            doc! { "$group": {
                "_id": "$channel_id",
                "post_count": { "$sum": 1 },
                "total_likes": { "$sum": "$stats.likes" },
                "total_views": { "$sum": "$stats.views" },
                "avg_likes_per_post": { "$avg": "$stats.likes" },
            } },
            doc! { "$sort": { "total_likes": -1 } },
            doc! { "$limit": 10 },
        ];

        let cursor = self.posts().aggregate(pipeline).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        documents
            .into_iter()
            .map(|d| from_document(d).map_err(Into::into))
            .collect()
    }

    pub async fn record_user_interaction(
        &self,
        user_id: &str,
        post_id: i64,
        action: &str,
    ) -> Result<()> {
        self.interactions()
            .insert_one(doc! {
                "user_id": user_id,
                "post_id": post_id,
                "action": action,
                "timestamp": DateTime::now(),
            })
            .await?;
        Ok(())
    }

    /// Most recent interactions for a user, each joined with the post title.
    ///
    /// Adaptive: light users go through a single `$lookup` aggregation;
    /// heavy users are split into an interactions query plus one bulk post
    /// fetch joined in application code, which caps the join amplification.
    pub async fn get_user_history(&self, user_id: &str, limit: i64) -> Result<Value> {
        let interactions = self.interactions();
        let count = interactions
            .count_documents(doc! { "user_id": user_id })
            .await?;

        if count < HISTORY_LOOKUP_CUTOFF {
            let pipeline = vec![
                doc! { "$match": { "user_id": user_id } },
                doc! { "$lookup": {
                    "from": crate::POSTS,
                    "localField": "post_id",
                    "foreignField": "post_id",
                    "as": "post_details",
                } },
                doc! { "$unwind": "$post_details" },
                doc! { "$sort": { "timestamp": -1 } },
                doc! { "$limit": limit },
                doc! { "$project": {
                    "action": 1,
                    "timestamp": 1,
                    "post_id": 1,
                    "post_title": "$post_details.title",
                    "_id": 0,
                } },
            ];

            let cursor = interactions.aggregate(pipeline).await?;
            let results: Vec<Document> = cursor.try_collect().await?;
            return Ok(docs_to_json(results));
        }

        let pipeline = vec![
            doc! { "$match": { "user_id": user_id } },
            doc! { "$sort": { "timestamp": -1 } },
            doc! { "$limit": limit },
            doc! { "$project": { "action": 1, "timestamp": 1, "post_id": 1, "_id": 0 } },
        ];
        let cursor = interactions.aggregate(pipeline).await?;
        let recent: Vec<Document> = cursor.try_collect().await?;
        if recent.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }

        let post_ids: Vec<i64> = recent
            .iter()
            .filter_map(|i| numeric_id(i.get("post_id")))
            .collect();

        let cursor = self
            .posts()
            .find(doc! { "post_id": { "$in": post_ids } })
            .with_options(
                FindOptions::builder()
                    .projection(doc! { "post_id": 1, "title": 1, "_id": 0 })
                    .build(),
            )
            .await?;
        let posts: Vec<Document> = cursor.try_collect().await?;

        let titles: std::collections::HashMap<i64, String> = posts
            .into_iter()
            .filter_map(|p| {
                let id = numeric_id(p.get("post_id"))?;
                let title = p.get_str("title").ok()?.to_string();
                Some((id, title))
            })
            .collect();

        let joined: Vec<Value> = recent
            .into_iter()
            .map(|interaction| {
                let post_id = numeric_id(interaction.get("post_id"));
                let mut entry = doc_to_json(interaction);
                if let (Some(obj), Some(id)) = (entry.as_object_mut(), post_id) {
                    obj.insert(
                        "post_title".to_string(),
                        titles.get(&id).cloned().map(Value::String).unwrap_or(Value::Null),
                    );
                }
                entry
            })
            .collect();

        Ok(Value::Array(joined))
    }
}

fn numeric_id(value: Option<&mongodb::bson::Bson>) -> Option<i64> {
    match value {
        Some(mongodb::bson::Bson::Int32(i)) => Some(*i as i64),
        Some(mongodb::bson::Bson::Int64(i)) => Some(*i),
        Some(mongodb::bson::Bson::Double(f)) => Some(*f as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_build_an_empty_match() {
        let filter = build_search_filter(&SearchFilters::default());
        assert!(filter.is_empty());
    }

    #[test]
    fn include_and_exclude_tags_share_one_clause() {
        let filters = SearchFilters {
            tags: vec!["rust".into(), "news".into()],
            exclude_tags: vec!["spam".into()],
            min_likes: None,
        };
        let filter = build_search_filter(&filters);
        let tags = filter.get_document("tags").unwrap();
        assert_eq!(tags.get_array("$all").unwrap().len(), 2);
        assert_eq!(tags.get_array("$nin").unwrap().len(), 1);
    }

    #[test]
    fn zero_min_likes_is_ignored() {
        let filters = SearchFilters {
            min_likes: Some(0),
            ..Default::default()
        };
        assert!(build_search_filter(&filters).is_empty());
    }

    #[test]
    fn positive_min_likes_becomes_gte() {
        let filters = SearchFilters {
            min_likes: Some(5),
            ..Default::default()
        };
        let filter = build_search_filter(&filters);
        assert_eq!(
            filter.get_document("stats.likes").unwrap().get_i64("$gte").unwrap(),
            5
        );
    }

    #[test]
    fn numeric_id_accepts_all_bson_number_widths() {
        use mongodb::bson::Bson;
        assert_eq!(numeric_id(Some(&Bson::Int32(3))), Some(3));
        assert_eq!(numeric_id(Some(&Bson::Int64(4))), Some(4));
        assert_eq!(numeric_id(Some(&Bson::Double(5.0))), Some(5));
        assert_eq!(numeric_id(Some(&Bson::String("6".into()))), None);
    }
}
