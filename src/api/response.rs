use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::media::{MediaError, SweepError};
use crate::storage::DatabaseError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JSendStatus {
    Error,
    Fail,
    Success,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JSend<T: Serialize> {
    pub data: T,
    pub status: JSendStatus,
}

impl<T: Serialize> JSend<T> {
    pub fn success(data: T) -> Json<JSend<T>> {
        Json(JSend {
            data,
            status: JSendStatus::Success,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct JSendPaginated<T: Serialize> {
    pub data: PaginatedData<T>,
    pub status: JSendStatus,
}

#[derive(Debug, Serialize)]
pub struct PaginatedData<T: Serialize> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
}

impl<T: Serialize> JSendPaginated<T> {
    pub fn success(items: Vec<T>, pagination: Pagination) -> Json<JSendPaginated<T>> {
        Json(JSendPaginated {
            data: PaginatedData { items, pagination },
            status: JSendStatus::Success,
        })
    }
}

/// Client error body: `{"status": "fail", "data": {"message": ...}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JSendFail {
    pub data: FailData,
    pub status: JSendStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailData {
    pub message: String,
}

/// Server error body: `{"status": "error", "message": ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JSendError {
    pub message: String,
    pub status: JSendStatus,
}

/// Handler error. `Fail` renders as a JSend fail, `Error` as a JSend error.
#[derive(Debug)]
pub enum ApiError {
    Fail(StatusCode, String),
    Error(StatusCode, String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Fail(code, message) => (
                code,
                Json(JSendFail {
                    data: FailData { message },
                    status: JSendStatus::Fail,
                }),
            )
                .into_response(),
            ApiError::Error(code, message) => (
                code,
                Json(JSendError {
                    message,
                    status: JSendStatus::Error,
                }),
            )
                .into_response(),
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::FORBIDDEN, message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::NOT_FOUND, message.into())
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::PAYLOAD_TOO_LARGE, message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::CONFLICT, message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::SERVICE_UNAVAILABLE, message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Error(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::AlbumNotFound(_) => ApiError::not_found("Album not found"),
            MediaError::InvalidKey { .. } | MediaError::DuplicateKey(_) => {
                ApiError::bad_request(e.to_string())
            }
            MediaError::KeyConflict { .. } | MediaError::KeyReclaiming(_) => {
                ApiError::conflict(e.to_string())
            }
            MediaError::BucketProvisionFailed { .. } => {
                tracing::error!(error = %e, "Media bucket unavailable");
                ApiError::unavailable("Media storage is unavailable, retry shortly")
            }
            _ => {
                tracing::error!(error = %e, "Media operation failed");
                ApiError::internal(e.to_string())
            }
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        tracing::error!(error = %e, "Record store failure");
        ApiError::internal(e.to_string())
    }
}

impl From<SweepError> for ApiError {
    fn from(e: SweepError) -> Self {
        tracing::error!(error = %e, "Reconciliation sweep failed");
        ApiError::internal(e.to_string())
    }
}

/// Query extractor that rejects with a JSend fail instead of axum's plain text.
pub struct AppQuery<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, ApiError> {
        let query = parts.uri.query().unwrap_or_default();
        serde_qs::from_str(query)
            .map(AppQuery)
            .map_err(|e| ApiError::bad_request(friendly_query_error(&e.to_string())))
    }
}

fn friendly_query_error(raw: &str) -> String {
    let cleaned = raw
        .replace("u32", "non-negative integer")
        .replace("u64", "non-negative integer")
        .replace("i64", "integer");

    format!("Invalid query parameter: {cleaned}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::ObjectStoreError;

    async fn render(e: impl Into<ApiError>) -> (StatusCode, serde_json::Value) {
        let response = e.into().into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn client_errors_are_jsend_fail() {
        let (status, body) = render(MediaError::AlbumNotFound(3)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["data"]["message"], "Album not found");

        let (status, _) = render(MediaError::DuplicateKey("a.jpg".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = render(MediaError::KeyConflict {
            key: "a.jpg".into(),
            owner: 1,
        })
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body["data"]["message"],
            "Object key 'a.jpg' is already attached to album 1"
        );
    }

    #[tokio::test]
    async fn storage_outages_are_retryable() {
        let (status, _) = render(MediaError::BucketProvisionFailed {
            bucket: "album-media".into(),
            source: ObjectStoreError::StoreUnavailable("down".into()),
        })
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn server_errors_are_jsend_error() {
        let (status, body) = render(MediaError::Record(DatabaseError::Constraint(
            "album 3 does not exist".into(),
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("album 3"));
    }

    #[test]
    fn query_errors_name_the_expected_type() {
        let message = friendly_query_error("limit: invalid digit found in string, expected u32");
        assert!(message.starts_with("Invalid query parameter:"));
        assert!(message.contains("non-negative integer"));
    }
}
