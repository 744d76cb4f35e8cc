use std::time::Duration;

use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Acquire, Postgres, Transaction};
use tracing::{info, warn};

use newsgrid_common::config::mask_credentials;

use crate::{Result, StoreError};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Read/write-split pool: one child pool per relational endpoint.
///
/// The primary slot must answer `pg_is_in_recovery() = false`, the replica
/// slot `true`. A child whose observed role contradicts its slot is closed
/// and dropped; at least one child must survive construction.
pub struct SplitPool {
    primary: Option<PgPool>,
    replica: Option<PgPool>,
}

/// A connection checked out of one of the child pools. Returns to its
/// originating pool on drop.
pub struct PoolConn {
    conn: sqlx::pool::PoolConnection<Postgres>,
    replica: bool,
}

impl SplitPool {
    pub async fn connect(
        primary_url: &str,
        replica_url: Option<&str>,
        pool_size: u32,
    ) -> Result<Self> {
        let mut pool = Self {
            primary: None,
            replica: None,
        };

        match open_child(primary_url, pool_size).await {
            Ok(child) => match probe_in_recovery(&child).await {
                Ok(false) => {
                    info!(url = %mask_credentials(primary_url), "Primary pool created");
                    pool.primary = Some(child);
                }
                Ok(true) => {
                    warn!(url = %mask_credentials(primary_url), "Endpoint is in recovery, not a primary");
                    child.close().await;
                }
                Err(e) => {
                    warn!(url = %mask_credentials(primary_url), error = %e, "Primary role probe failed");
                    child.close().await;
                }
            },
            Err(e) => {
                warn!(url = %mask_credentials(primary_url), error = %e, "Failed to create primary pool");
            }
        }

        if let Some(url) = replica_url {
            match open_child(url, pool_size).await {
                Ok(child) => match probe_in_recovery(&child).await {
                    Ok(true) => {
                        info!(url = %mask_credentials(url), "Replica pool created");
                        pool.replica = Some(child);
                    }
                    Ok(false) => {
                        warn!(url = %mask_credentials(url), "Endpoint is not in recovery, not a replica");
                        child.close().await;
                    }
                    Err(e) => {
                        warn!(url = %mask_credentials(url), error = %e, "Replica role probe failed");
                        child.close().await;
                    }
                },
                Err(e) => {
                    warn!(url = %mask_credentials(url), error = %e, "Failed to create replica pool");
                }
            }
        }

        if pool.primary.is_none() && pool.replica.is_none() {
            return Err(StoreError::Unavailable(
                "no valid database endpoints".to_string(),
            ));
        }

        Ok(pool)
    }

    /// Check out a connection, preferring the replica for read-only work.
    ///
    /// A failed replica acquisition falls through to the primary; a write
    /// acquisition never touches the replica.
    pub async fn acquire(&self, read_only: bool) -> Result<PoolConn> {
        if read_only {
            if let Some(replica) = &self.replica {
                match replica.acquire().await {
                    Ok(conn) => {
                        return Ok(PoolConn {
                            conn,
                            replica: true,
                        })
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to acquire replica connection, falling back to primary");
                    }
                }
            }
        }

        let Some(primary) = &self.primary else {
            return Err(StoreError::Unavailable(
                "no primary endpoint available".to_string(),
            ));
        };

        let conn = primary
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(format!("primary acquire: {e}")))?;

        Ok(PoolConn {
            conn,
            replica: false,
        })
    }

    /// Ping both children. Failures are logged, not propagated; acquisition
    /// keeps routing to whichever endpoint still answers.
    pub async fn health_check(&self) {
        if let Some(primary) = &self.primary {
            if let Err(e) = ping(primary).await {
                warn!(error = %e, "Primary health check failed");
            }
        }
        if let Some(replica) = &self.replica {
            if let Err(e) = ping(replica).await {
                warn!(error = %e, "Replica health check failed");
            }
        }
    }

    /// The primary child pool, when one survived construction.
    /// Migrations run here; generic traffic goes through [`acquire`].
    pub fn primary(&self) -> Option<&PgPool> {
        self.primary.as_ref()
    }

    pub async fn close(&self) {
        if let Some(primary) = &self.primary {
            primary.close().await;
            info!("Primary pool closed");
        }
        if let Some(replica) = &self.replica {
            replica.close().await;
            info!("Replica pool closed");
        }
    }
}

impl PoolConn {
    pub fn is_replica(&self) -> bool {
        self.replica
    }

    /// The raw connection, for single-statement execution.
    pub fn as_conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Open a transaction pinned to this connection. Dropping the
    /// transaction without committing rolls it back.
    pub async fn begin(&mut self) -> std::result::Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.conn.begin().await
    }
}

async fn open_child(url: &str, pool_size: u32) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(pool_size)
        .min_connections(pool_size / 2)
        .max_lifetime(Duration::from_secs(3600))
        .idle_timeout(Duration::from_secs(1800))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(url)
        .await
}

/// Recovery probe: `true` means the endpoint is a replica.
async fn probe_in_recovery(pool: &PgPool) -> std::result::Result<bool, sqlx::Error> {
    tokio::time::timeout(
        PROBE_TIMEOUT,
        sqlx::query_scalar::<_, bool>("SELECT pg_is_in_recovery()").fetch_one(pool),
    )
    .await
    .map_err(|_| sqlx::Error::PoolTimedOut)?
}

async fn ping(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    tokio::time::timeout(
        PING_TIMEOUT,
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool),
    )
    .await
    .map_err(|_| sqlx::Error::PoolTimedOut)??;
    Ok(())
}
