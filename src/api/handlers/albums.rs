use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery, JSend, JSendPaginated, Pagination};
use crate::media::{MediaOutcome, MediaUpload, PartialDetachResidue};
use crate::storage::models::{AlbumFilter, AlbumPatch, AlbumRecord, MediaRecord, NewAlbum, Patch};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AlbumResponse {
    pub artist_id: Option<u64>,
    pub created_at: String,
    pub id: u64,
    pub media: Vec<MediaResponse>,
    pub name: String,
    pub publication_year: Option<i32>,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct MediaResponse {
    pub created_at: String,
    pub id: u64,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct DetachResponse {
    pub removed: Vec<String>,
    /// Objects whose rows are gone but which could not be deleted yet
    pub residue: Vec<PartialDetachResidue>,
}

#[derive(Debug, Deserialize)]
pub struct ListAlbumsParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artist_id: Option<u64>,
}

fn default_limit() -> u32 {
    20
}

/// Album fields and files collected from a multipart body.
#[derive(Default)]
struct AlbumForm {
    name: Option<String>,
    publication_year: Option<Option<i32>>,
    artist_id: Option<Option<u64>>,
    files: Vec<MediaUpload>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_album(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<JSend<AlbumResponse>>, ApiError> {
    let form = read_album_form(&state, multipart).await?;

    let name = form
        .name
        .ok_or_else(|| ApiError::bad_request("name field is required"))?;
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }

    let album = NewAlbum {
        name,
        publication_year: form.publication_year.flatten(),
        artist_id: form.artist_id.flatten(),
    };

    let (record, outcome) = state.coordinator.create_album(album, form.files).await?;

    tracing::debug!(album_id = record.id, media = outcome.attached.len(), "Created album");
    Ok(JSend::success(album_to_response(&record, &outcome.attached)))
}

pub async fn get_album(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<JSend<AlbumResponse>>, ApiError> {
    let album = state
        .db
        .get_album(id)?
        .ok_or_else(|| ApiError::not_found("Album not found"))?;
    let media = state.db.get_album_media(id)?;

    Ok(JSend::success(album_to_response(&album, &media)))
}

/// Multipart patch. An empty `publication_year` or `artist_id` clears the field;
/// `files` parts are added to the album.
pub async fn update_album(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    multipart: Multipart,
) -> Result<Json<JSend<AlbumResponse>>, ApiError> {
    let form = read_album_form(&state, multipart).await?;

    if let Some(ref name) = form.name {
        if name.trim().is_empty() {
            return Err(ApiError::bad_request("name must not be empty"));
        }
    }

    let patch = AlbumPatch {
        name: form.name,
        publication_year: Patch::from(form.publication_year),
        artist_id: Patch::from(form.artist_id),
    };
    if patch.is_empty() && form.files.is_empty() {
        return Err(ApiError::bad_request(
            "at least one field (name, publication_year, artist_id, files) must be provided",
        ));
    }

    let (record, outcome) = state.coordinator.update_album(id, patch, form.files).await?;

    let media = state.db.get_album_media(id)?;

    tracing::debug!(album_id = id, media = outcome.attached.len(), "Updated album");
    Ok(JSend::success(album_to_response(&record, &media)))
}

pub async fn delete_album(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<JSend<DetachResponse>>, ApiError> {
    let outcome = state.coordinator.delete_album(id).await?;

    tracing::debug!(album_id = id, "Deleted album");
    Ok(JSend::success(detach_response(outcome)))
}

pub async fn delete_album_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<JSend<DetachResponse>>, ApiError> {
    let outcome = state.coordinator.detach_media(id).await?;

    Ok(JSend::success(detach_response(outcome)))
}

pub async fn list_albums(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListAlbumsParams>,
) -> Result<Json<JSendPaginated<AlbumResponse>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let filter = AlbumFilter {
        name: params.name.filter(|n| !n.is_empty()),
        artist_id: params.artist_id,
    };
    let albums = state.db.list_albums(&filter)?;

    let total = albums.len() as u64;
    let mut items = Vec::new();
    for album in albums
        .iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
    {
        let media = state.db.get_album_media(album.id)?;
        items.push(album_to_response(album, &media));
    }

    Ok(JSendPaginated::success(
        items,
        Pagination {
            limit: params.limit,
            offset: params.offset,
            total,
        },
    ))
}

// ============================================================================
// Helpers
// ============================================================================

async fn read_album_form(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<AlbumForm, ApiError> {
    let mut form = AlbumForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "files" => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| ApiError::bad_request("every files part needs a filename"))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

                if data.len() as u64 > state.config.max_upload_size {
                    return Err(ApiError::payload_too_large(format!(
                        "File exceeds maximum upload size of {} bytes",
                        state.config.max_upload_size
                    )));
                }
                form.files.push(MediaUpload::new(file_name, data));
            }
            "name" => {
                form.name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Invalid name: {e}")))?,
                );
            }
            "publication_year" => {
                let text = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Invalid publication_year: {e}"))
                })?;
                form.publication_year = Some(parse_optional(&text, "publication_year")?);
            }
            "artist_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid artist_id: {e}")))?;
                form.artist_id = Some(parse_optional(&text, "artist_id")?);
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    Ok(form)
}

/// Empty text means "no value".
fn parse_optional<T: std::str::FromStr>(text: &str, field: &str) -> Result<Option<T>, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|_| ApiError::bad_request(format!("{field} must be an integer")))
}

fn album_to_response(album: &AlbumRecord, media: &[MediaRecord]) -> AlbumResponse {
    AlbumResponse {
        artist_id: album.artist_id,
        created_at: album.created_at.to_rfc3339(),
        id: album.id,
        media: media.iter().map(media_to_response).collect(),
        name: album.name.clone(),
        publication_year: album.publication_year,
        updated_at: album.updated_at.to_rfc3339(),
    }
}

fn media_to_response(media: &MediaRecord) -> MediaResponse {
    MediaResponse {
        created_at: media.created_at.to_rfc3339(),
        id: media.id,
        name: media.name.clone(),
        url: media.url.clone(),
    }
}

fn detach_response(outcome: MediaOutcome) -> DetachResponse {
    DetachResponse {
        removed: outcome.removed,
        residue: outcome.residue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_state;
    use axum::http::StatusCode;

    #[test]
    fn parse_optional_handles_blank_and_numbers() {
        assert_eq!(parse_optional::<i32>("", "year").unwrap(), None);
        assert_eq!(parse_optional::<i32>(" 1999 ", "year").unwrap(), Some(1999));
        assert!(parse_optional::<u64>("abc", "artist_id").is_err());
    }

    async fn seed_album(state: &AppState, name: &str, artist_id: Option<u64>) -> u64 {
        let album = NewAlbum {
            name: name.to_string(),
            publication_year: Some(1999),
            artist_id,
        };
        let files = vec![MediaUpload::new(format!("{name}/cover.jpg"), "jpeg")];
        let (record, _) = state.coordinator.create_album(album, files).await.unwrap();
        record.id
    }

    #[tokio::test]
    async fn get_album_includes_media() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (state, _store) = test_state(&temp_dir);
        let id = seed_album(&state, "blue", None).await;

        let Json(body) = get_album(State(state.clone()), Path(id)).await.unwrap();
        assert_eq!(body.data.name, "blue");
        assert_eq!(body.data.media.len(), 1);
        assert_eq!(body.data.media[0].name, "blue/cover.jpg");
    }

    #[tokio::test]
    async fn missing_album_is_404() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (state, _store) = test_state(&temp_dir);

        let err = get_album(State(state.clone()), Path(42)).await.unwrap_err();
        assert!(matches!(err, ApiError::Fail(code, _) if code == StatusCode::NOT_FOUND));

        let err = delete_album_media(State(state), Path(42)).await.unwrap_err();
        assert!(matches!(err, ApiError::Fail(code, _) if code == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (state, _store) = test_state(&temp_dir);
        seed_album(&state, "Blue Train", Some(1)).await;
        seed_album(&state, "Kind of Blue", Some(2)).await;
        seed_album(&state, "Giant Steps", Some(1)).await;

        let params = ListAlbumsParams {
            limit: 1,
            offset: 1,
            name: Some("blue".to_string()),
            artist_id: None,
        };
        let Json(body) = list_albums(State(state.clone()), AppQuery(params)).await.unwrap();
        assert_eq!(body.data.pagination.total, 2);
        assert_eq!(body.data.items.len(), 1);
        assert_eq!(body.data.items[0].name, "Kind of Blue");

        let params = ListAlbumsParams {
            limit: 20,
            offset: 0,
            name: None,
            artist_id: Some(1),
        };
        let Json(body) = list_albums(State(state), AppQuery(params)).await.unwrap();
        let names: Vec<&str> = body.data.items.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Blue Train", "Giant Steps"]);
    }

    #[tokio::test]
    async fn delete_album_reports_removed_objects() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (state, store) = test_state(&temp_dir);
        let id = seed_album(&state, "blue", None).await;

        let Json(body) = delete_album(State(state.clone()), Path(id)).await.unwrap();
        assert_eq!(body.data.removed, vec!["blue/cover.jpg".to_string()]);
        assert!(body.data.residue.is_empty());
        assert!(store.keys(state.coordinator.bucket()).is_empty());
        assert!(state.db.get_album(id).unwrap().is_none());
    }
}
