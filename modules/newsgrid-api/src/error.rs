use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use newsgrid_docstore::DocStoreError;
use newsgrid_store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error surface of the HTTP layer. Bodies are plain-text diagnostics
/// prefixed with the failing stage.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    /// Wrap an arbitrary failure with the stage it occurred in.
    pub fn stage(stage: &str, error: impl std::fmt::Display) -> Self {
        Self::Internal(format!("{stage}: {error}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Conflict(m) => (StatusCode::CONFLICT, m),
            Self::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, message).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(m) => Self::Unavailable(m),
            StoreError::Rejected(m) => Self::BadRequest(format!("validation: {m}")),
            StoreError::Database(e) => Self::Internal(format!("query: {e}")),
        }
    }
}

impl From<DocStoreError> for ApiError {
    fn from(error: DocStoreError) -> Self {
        match error {
            DocStoreError::Duplicate(m) => Self::Conflict(m),
            other => Self::Internal(format!("document store: {other}")),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        Self::Internal(format!("query: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_rejection_maps_to_bad_request() {
        let api: ApiError = StoreError::Rejected("author exists".into()).into();
        assert!(matches!(api, ApiError::BadRequest(m) if m.contains("author exists")));
    }

    #[test]
    fn pool_exhaustion_maps_to_unavailable() {
        let api: ApiError = StoreError::Unavailable("primary acquire".into()).into();
        assert!(matches!(api, ApiError::Unavailable(_)));
    }

    #[test]
    fn duplicate_document_maps_to_conflict() {
        let api: ApiError = DocStoreError::Duplicate("hash".into()).into();
        assert!(matches!(api, ApiError::Conflict(_)));
    }
}
