//! Recommended feed API endpoints
//!
//! Admin:
//! - GET    /api/v1/admin/recommended - Full set, stale entries flagged
//! - GET    /api/v1/admin/recommended/available - Candidates
//! - POST   /api/v1/admin/recommended - Add a listing
//! - DELETE /api/v1/admin/recommended/{id} - Remove an entry
//! - PUT    /api/v1/admin/recommended/order - Reorder
//! - POST   /api/v1/admin/recommended/random - Toggle random mode
//! - POST   /api/v1/admin/recommended/restore - Undo the last random draw
//!
//! Public:
//! - GET    /api/v1/recommended - The feed end users see

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::middleware::{ApiError, AppState};
use crate::models::{ListingSnapshot, RandomModeOutcome, RecommendedEntry, RecommendedItem};

#[derive(Debug, Serialize)]
pub struct RecommendedListResponse {
    pub random_mode: bool,
    pub items: Vec<RecommendedItem>,
}

#[derive(Debug, Serialize)]
pub struct AvailableListingsResponse {
    pub items: Vec<ListingSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct AddRecommendedRequest {
    pub listing_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RandomModeRequest {
    pub enabled: bool,
    /// Required to overwrite hand-picked entries
    #[serde(default)]
    pub confirm: bool,
    /// When disabling, also drop the random entries
    #[serde(default)]
    pub clear: bool,
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_recommended_admin).post(add_recommended))
        .route("/available", get(list_available))
        .route("/order", put(reorder))
        .route("/random", post(set_random_mode))
        .route("/restore", post(restore_previous))
        .route("/{id}", delete(remove_recommended))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/", get(list_recommended_public))
}

async fn list_recommended_admin(
    State(state): State<AppState>,
) -> Result<Json<RecommendedListResponse>, ApiError> {
    Ok(Json(RecommendedListResponse {
        random_mode: state.curator.random_mode().await?,
        items: state.curator.list_recommended_for_admin().await?,
    }))
}

async fn list_recommended_public(
    State(state): State<AppState>,
) -> Result<Json<RecommendedListResponse>, ApiError> {
    Ok(Json(RecommendedListResponse {
        random_mode: state.curator.random_mode().await?,
        items: state.curator.list_recommended().await?,
    }))
}

async fn list_available(
    State(state): State<AppState>,
) -> Result<Json<AvailableListingsResponse>, ApiError> {
    Ok(Json(AvailableListingsResponse {
        items: state.curator.list_available().await?,
    }))
}

async fn add_recommended(
    State(state): State<AppState>,
    Json(body): Json<AddRecommendedRequest>,
) -> Result<(StatusCode, Json<RecommendedEntry>), ApiError> {
    let entry = state.curator.add(body.listing_id).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn remove_recommended(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.curator.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder(
    State(state): State<AppState>,
    Json(body): Json<ReorderRequest>,
) -> Result<Json<Vec<RecommendedItem>>, ApiError> {
    Ok(Json(state.curator.reorder(&body.ids).await?))
}

async fn set_random_mode(
    State(state): State<AppState>,
    Json(body): Json<RandomModeRequest>,
) -> Result<Json<RandomModeOutcome>, ApiError> {
    if !body.enabled {
        return Ok(Json(state.curator.disable_random_mode(body.clear).await?));
    }

    if !body.confirm {
        let manual = state.curator.manual_entry_count().await?;
        if manual > 0 {
            return Err(ApiError::with_details(
                "CONFIRMATION_REQUIRED",
                format!(
                    "Enabling random mode replaces {} hand-picked entries; resend with confirm",
                    manual
                ),
                json!({ "manual_entries": manual }),
            ));
        }
    }

    Ok(Json(state.curator.set_random_mode(true).await?))
}

async fn restore_previous(
    State(state): State<AppState>,
) -> Result<Json<RandomModeOutcome>, ApiError> {
    Ok(Json(state.curator.restore_previous().await?))
}
