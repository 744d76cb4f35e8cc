//! Opaque string→string cache with per-entry TTLs.
//!
//! A miss and a backend failure look the same to callers; the only hard
//! requirement is the pattern delete used for keyspace invalidation.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Keys are deleted in batches of this size during a pattern scan.
const DEL_BATCH: usize = 100;

#[derive(Clone)]
pub struct CacheManager {
    conn: ConnectionManager,
}

impl CacheManager {
    /// Connect and ping. Startup-fatal: a server that cannot reach its cache
    /// at boot is misconfigured, even though a running server tolerates
    /// cache outages as universal misses.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        info!("Cache connected");
        Ok(Self { conn })
    }

    /// Fetch a key. `None` covers both not-found and backend failure;
    /// callers fall through to the store of record either way.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "Cache get failed, treating as miss");
                None
            }
        }
    }

    /// Store a value with a TTL in seconds. Failures are logged only.
    pub async fn set_ex(&self, key: &str, value: &str, seconds: u64) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, seconds).await {
            warn!(key, error = %e, "Cache set failed");
        }
    }

    /// Delete exact keys. Failures are logged only.
    pub async fn del(&self, keys: &[&str]) {
        if keys.is_empty() {
            return;
        }
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(keys.to_vec()).await {
            warn!(?keys, error = %e, "Cache delete failed");
        }
    }

    /// Delete every key matching a glob pattern.
    ///
    /// Walks the keyspace with a SCAN cursor and deletes in batches. This is
    /// the only operation allowed to be O(keyspace).
    pub async fn del_pattern(&self, pattern: &str) {
        let mut scan_conn = self.conn.clone();
        let mut keys: Vec<String> = Vec::new();

        match scan_conn.scan_match::<_, String>(pattern).await {
            Ok(mut iter) => {
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
            }
            Err(e) => {
                warn!(pattern, error = %e, "Cache scan failed");
                return;
            }
        }

        let mut conn = self.conn.clone();
        for batch in keys.chunks(DEL_BATCH) {
            if let Err(e) = conn.del::<_, ()>(batch.to_vec()).await {
                warn!(pattern, error = %e, "Cache batch delete failed");
                return;
            }
        }
    }
}
