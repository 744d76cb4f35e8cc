//! The weekly `$facet` report: one pipeline, four concurrent groupings.

use futures::TryStreamExt;
use mongodb::bson::{doc, from_document, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};

use crate::{DocStore, Result, CHANNELS};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WeeklyReport {
    #[serde(default)]
    pub by_source: Vec<SourceStats>,
    #[serde(default)]
    pub by_topic: Vec<TopicStats>,
    #[serde(default)]
    pub by_day: Vec<DayStats>,
    #[serde(default)]
    pub summary: Vec<SummaryStats>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourceStats {
    #[serde(rename = "_id")]
    pub source_id: Option<i64>,
    pub source_name: Option<String>,
    pub total_posts: i64,
    pub total_views: i64,
    pub total_likes: i64,
    pub avg_engagement: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TopicStats {
    #[serde(rename = "_id")]
    pub topic: Option<String>,
    pub post_count: i64,
    pub total_engagement: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DayStats {
    /// Day-of-week bucket boundary, or the string "other" for the overflow
    /// bucket; heterogeneous by construction.
    #[serde(rename = "_id")]
    pub day: Bson,
    pub count: i64,
    pub avg_likes: Option<f64>,
    pub posts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_posts: i64,
    pub unique_channels_count: i64,
    pub unique_tags_count: i64,
    pub total_views: i64,
    pub total_engagement: i64,
    pub avg_views_per_post: Option<f64>,
}

impl DocStore {
    /// Aggregate the last 7 days of posts into per-source, per-topic,
    /// per-day and overall summaries in a single `$facet` pass.
    pub async fn get_weekly_report(&self) -> Result<WeeklyReport> {
        let week_ago = DateTime::from_chrono(chrono::Utc::now() - chrono::Duration::days(7));

        let pipeline = vec![
            doc! { "$match": { "created_at": { "$gte": week_ago } } },
            doc! { "$lookup": {
                "from": CHANNELS,
                "localField": "channel_id",
                "foreignField": "channel_id",
                "as": "channel_info",
            } },
            doc! { "$unwind": {
                "path": "$channel_info",
                "preserveNullAndEmptyArrays": false,
            } },
            doc! { "$unwind": {
                "path": "$tags",
                "preserveNullAndEmptyArrays": true,
            } },
            doc! { "$facet": {
                "by_source": [
                    { "$group": {
                        "_id": "$channel_info.source_id",
                        "source_name": { "$first": "$channel_info.name" },
                        "total_posts": { "$sum": 1 },
                        "total_views": { "$sum": "$stats.views" },
                        "total_likes": { "$sum": "$stats.likes" },
                        "avg_engagement": { "$avg": {
                            "$divide": [
                                { "$add": ["$stats.likes", "$stats.shares"] },
                                { "$max": ["$stats.views", 1] },
                            ],
                        } },
                    } },
                    { "$sort": { "total_posts": -1 } },
                    { "$limit": 10 },
                ],
                "by_topic": [
                    { "$group": {
                        "_id": "$tags",
                        "post_count": { "$sum": 1 },
                        "total_engagement": { "$sum": {
                            "$add": ["$stats.likes", "$stats.shares"],
                        } },
                    } },
                    { "$sort": { "post_count": -1 } },
                    { "$limit": 20 },
                ],
                "by_day": [
                    { "$bucket": {
                        "groupBy": { "$dayOfWeek": "$created_at" },
                        "boundaries": [1, 2, 3, 4, 5, 6, 7, 8],
                        "default": "other",
                        "output": {
                            "count": { "$sum": 1 },
                            "avg_likes": { "$avg": "$stats.likes" },
                            "posts": { "$push": "$title" },
                        },
                    } },
                ],
                "summary": [
                    { "$group": {
                        "_id": null,
                        "total_posts": { "$sum": 1 },
                        "unique_channels": { "$addToSet": "$channel_id" },
                        "unique_tags": { "$addToSet": "$tags" },
                        "total_views": { "$sum": "$stats.views" },
                        "total_engagement": { "$sum": {
                            "$add": ["$stats.likes", "$stats.shares"],
                        } },
                    } },
                    { "$project": {
                        "_id": 0,
                        "total_posts": 1,
                        "unique_channels_count": { "$size": "$unique_channels" },
                        "unique_tags_count": { "$size": "$unique_tags" },
                        "total_views": 1,
                        "total_engagement": 1,
                        "avg_views_per_post": {
                            "$divide": ["$total_views", "$total_posts"],
                        },
                    } },
                ],
            } },
        ];

        let cursor = self.posts().aggregate(pipeline).await?;
        let mut documents: Vec<Document> = cursor.try_collect().await?;
        match documents.pop() {
            Some(d) => Ok(from_document(d)?),
            None => Ok(WeeklyReport::default()),
        }
    }
}
