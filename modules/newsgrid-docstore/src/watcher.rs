//! Change-stream-driven invalidation of the channel report cache.

use futures::StreamExt;
use mongodb::bson::doc;
use tracing::{debug, info, warn};

use crate::{DocStore, Result};

impl DocStore {
    /// Watch `posts` for inserts, updates and deletes, rematerializing
    /// `cached_channel_reports` on every change.
    ///
    /// Stream errors log and end the task; restarting is the supervisor's
    /// job, not ours.
    pub fn spawn_cache_invalidation_watcher(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.watch_posts().await {
                warn!(error = %e, "Cache invalidation watcher exited");
            }
        })
    }

    async fn watch_posts(&self) -> Result<()> {
        let pipeline = vec![doc! { "$match": {
            "operationType": { "$in": ["insert", "update", "delete"] },
        } }];

        let mut stream = self.posts().watch().pipeline(pipeline).await?;
        info!("Cache invalidation watcher started");

        while let Some(event) = stream.next().await {
            let event = event?;
            debug!(operation = ?event.operation_type, "Posts changed, refreshing channel reports");
            if let Err(e) = self.materialize_channel_reports().await {
                warn!(error = %e, "Failed to refresh channel reports");
            }
        }

        Ok(())
    }
}
