//! Moderation API endpoints
//!
//! - GET  /api/v1/admin/entities/{kind} - List by status
//! - GET  /api/v1/admin/entities/{kind}/{id} - Get one entity
//! - POST /api/v1/admin/entities - Submit an entity for moderation
//! - POST /api/v1/admin/entities/{kind}/{id}/status - Change status
//! - POST /api/v1/admin/entities/{kind}/{id}/approve
//! - POST /api/v1/admin/entities/{kind}/{id}/reject
//! - GET  /api/v1/admin/moderation/{kind}/queue - Pending, oldest first
//! - POST /api/v1/admin/moderation/expire - Run the expiry sweep

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page, parse_kind, parse_status_filter};
use crate::api::middleware::{ApiError, AppState};
use crate::models::{EntityRecord, ListParams, ModerationStatus, NewEntity, PagedResult};
use crate::services::ExpiryReport;

#[derive(Debug, Deserialize)]
pub struct ListEntitiesQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: ModerationStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/entities", post(submit_entity))
        .route("/entities/{kind}", get(list_entities))
        .route("/entities/{kind}/{id}", get(get_entity))
        .route("/entities/{kind}/{id}/status", post(change_status))
        .route("/entities/{kind}/{id}/approve", post(approve_entity))
        .route("/entities/{kind}/{id}/reject", post(reject_entity))
        .route("/moderation/{kind}/queue", get(moderation_queue))
        .route("/moderation/expire", post(expire_due))
}

async fn list_entities(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ListEntitiesQuery>,
) -> Result<Json<PagedResult<EntityRecord>>, ApiError> {
    let kind = parse_kind(&kind)?;
    let filter = parse_status_filter(query.status.as_deref())?;
    let params = ListParams::new(query.page, query.per_page);
    Ok(Json(state.moderation.list(kind, filter, &params).await?))
}

async fn get_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
) -> Result<Json<EntityRecord>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.moderation.get(kind, id).await?))
}

async fn submit_entity(
    State(state): State<AppState>,
    Json(input): Json<NewEntity>,
) -> Result<(StatusCode, Json<EntityRecord>), ApiError> {
    let record = state.moderation.submit(input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn change_status(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    Json(body): Json<ChangeStatusRequest>,
) -> Result<Json<EntityRecord>, ApiError> {
    let kind = parse_kind(&kind)?;
    let record = state
        .moderation
        .change_status(kind, id, body.status, body.reason)
        .await?;
    Ok(Json(record))
}

async fn approve_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
) -> Result<Json<EntityRecord>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.moderation.approve(kind, id).await?))
}

async fn reject_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    Json(body): Json<RejectRequest>,
) -> Result<Json<EntityRecord>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.moderation.reject(kind, id, body.reason).await?))
}

async fn moderation_queue(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<crate::api::common::PaginationQuery>,
) -> Result<Json<PagedResult<EntityRecord>>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.moderation.queue(kind, &query.params()).await?))
}

async fn expire_due(State(state): State<AppState>) -> Result<Json<ExpiryReport>, ApiError> {
    Ok(Json(state.moderation.expire_due(Utc::now()).await?))
}
