//! Platform settings endpoints
//!
//! - GET /api/v1/admin/settings
//! - PUT /api/v1/admin/settings

use axum::{extract::State, routing::get, Json, Router};

use crate::api::middleware::{ApiError, AppState};
use crate::services::{PlatformSettings, SettingsUpdate};

pub fn router() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings).put(update_settings))
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<PlatformSettings>, ApiError> {
    Ok(Json(state.settings.get_platform_settings().await?))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<PlatformSettings>, ApiError> {
    Ok(Json(state.settings.update(&update).await?))
}
