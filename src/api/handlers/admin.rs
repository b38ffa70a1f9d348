use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::media::SweepReport;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub albums_deleted: u64,
    pub media_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Drop every record. Objects become orphans and are left to the sweep.
pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    let stats = state.db.purge_all()?;

    tracing::warn!(albums = stats.albums, media = stats.media, "Purged all data");

    Ok(JSend::success(PurgeResponse {
        albums_deleted: stats.albums,
        media_deleted: stats.media,
    }))
}

/// Run one reconciliation sweep now.
pub async fn admin_reconcile(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<SweepReport>>, ApiError> {
    let report = state.sweep.run_once().await?;

    Ok(JSend::success(report))
}
