use thiserror::Error;

#[derive(Error, Debug)]
pub enum NewsGridError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Document store error: {0}")]
    DocStore(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
