//! User administration endpoints
//!
//! - GET  /api/v1/admin/users?blocked=&page=&per_page=
//! - POST /api/v1/admin/users
//! - GET  /api/v1/admin/users/{id}
//! - POST /api/v1/admin/users/{id}/block
//! - POST /api/v1/admin/users/{id}/unblock
//! - PUT  /api/v1/admin/users/{id}/limits

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState};
use crate::models::{
    BlockFilter, CreateUserInput, ListParams, PagedResult, User, UserLimits, UserSummary,
};
use crate::services::BlockOutcome;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    /// `true` for blocked users only, `false` for everyone else
    #[serde(default)]
    pub blocked: Option<bool>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlockRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/block", post(block_user))
        .route("/users/{id}/unblock", post(unblock_user))
        .route("/users/{id}/limits", put(set_limits))
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<PagedResult<UserSummary>>, ApiError> {
    let filter = match query.blocked {
        None => BlockFilter::Any,
        Some(true) => BlockFilter::Blocked,
        Some(false) => BlockFilter::NotBlocked,
    };
    let params = ListParams::new(query.page, query.per_page);
    Ok(Json(state.users.list(filter, &params).await?))
}

async fn create_user(
    State(state): State<AppState>,
    Json(input): Json<CreateUserInput>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.users.create(input).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.users.get(id).await?))
}

async fn block_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<BlockRequest>,
) -> Result<Json<BlockOutcome>, ApiError> {
    Ok(Json(state.users.block(id, body.reason).await?))
}

async fn unblock_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.users.unblock(id).await?))
}

async fn set_limits(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(limits): Json<UserLimits>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.users.set_limits(id, limits).await?))
}
