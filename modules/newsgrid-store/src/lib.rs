pub mod pool;
pub mod validators;

pub use pool::{PoolConn, SplitPool};
pub use validators::validate_insert;

/// Result type alias for relational-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No endpoint could serve the acquisition. Maps to HTTP 503.
    #[error("database temporarily unavailable: {0}")]
    Unavailable(String),

    /// A validator rejected the payload. Maps to HTTP 400.
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Run the embedded SQL migrations against the primary.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
    Ok(())
}
