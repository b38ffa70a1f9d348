use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery};
use crate::object_store::ObjectStoreError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedUrlParams {
    pub expires: i64,
    pub signature: String,
}

/// Serve object content behind a URL issued by the local backend.
/// Route: GET /objects/:bucket/*key?expires&signature
pub async fn serve_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    AppQuery(params): AppQuery<SignedUrlParams>,
) -> Result<Response, ApiError> {
    let signer = state
        .url_signer
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Object URLs are not served by this backend"))?;

    if !signer.verify(&bucket, &key, params.expires, &params.signature) {
        return Err(ApiError::forbidden("URL signature is invalid or has expired"));
    }

    let data = state
        .object_store
        .get(&bucket, &key)
        .await
        .map_err(|e| match e {
            ObjectStoreError::NotFound(_) => ApiError::not_found("Object not found"),
            _ => ApiError::internal(format!("Failed to retrieve object: {e}")),
        })?;

    let mime_type = mime_guess::from_path(&key).first_or_octet_stream();
    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    if let Ok(value) = mime_type.as_ref().parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }

    let filename = key.rsplit('/').next().unwrap_or(&key);
    if let Ok(value) = format!("inline; filename=\"{filename}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // The URL expires, so caches must not outlive it.
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("private, no-store"),
    );

    Ok(response)
}
