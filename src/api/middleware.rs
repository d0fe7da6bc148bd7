//! API middleware
//!
//! Contains the shared application state, the JSON error type every handler
//! returns, and the bearer-token guard in front of the admin routes.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::config::Config;
use crate::db::repositories::{
    SqlxEntityRepository, SqlxRecommendedRepository, SqlxSettingsRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::services::{
    CuratorError, CuratorService, ModerationError, ModerationService, SettingsService,
    SettingsServiceError, StatsService, UserService, UserServiceError,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub moderation: Arc<ModerationService>,
    pub curator: Arc<CuratorService>,
    pub stats: Arc<StatsService>,
    pub settings: Arc<SettingsService>,
    pub users: Arc<UserService>,
    /// `None` locks every admin route
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    /// Wire repositories and services over one pool
    pub fn new(pool: DynDatabasePool, config: &Config) -> Self {
        let entity_repo = SqlxEntityRepository::boxed(pool.clone());
        let user_repo = SqlxUserRepository::boxed(pool.clone());

        let moderation = Arc::new(ModerationService::new(
            entity_repo.clone(),
            user_repo.clone(),
            &config.moderation,
        ));
        let curator = Arc::new(CuratorService::new(
            SqlxRecommendedRepository::boxed(pool.clone()),
            &config.curation,
        ));
        let stats = Arc::new(StatsService::new(
            entity_repo,
            user_repo.clone(),
            &config.reporting,
        ));
        let settings = Arc::new(SettingsService::new(
            SqlxSettingsRepository::boxed(pool),
            config.limits.clone(),
        ));
        let users = Arc::new(UserService::new(user_repo, moderation.clone()));

        Self {
            moderation,
            curator,
            stats,
            settings,
            users,
            admin_token: config.admin.token.as_deref().map(Arc::from),
        }
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    /// Logs the cause and hides it from the client
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        error!(error = %cause, "request failed");
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "INVALID_TRANSITION" | "ALREADY_RECOMMENDED" | "CONFLICT"
            | "CONFIRMATION_REQUIRED" => StatusCode::CONFLICT,
            "NOT_ELIGIBLE" => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<ModerationError> for ApiError {
    fn from(err: ModerationError) -> Self {
        match err {
            ModerationError::NotFound { .. } | ModerationError::UserNotFound(_) => {
                Self::not_found(err.to_string())
            }
            ModerationError::InvalidTransition(t) => Self::with_details(
                "INVALID_TRANSITION",
                t.to_string(),
                json!({ "kind": t.kind, "from": t.from, "to": t.to }),
            ),
            ModerationError::ValidationError(msg) => Self::validation_error(msg),
            ModerationError::Conflict { .. } => Self::conflict(err.to_string()),
            ModerationError::Internal(e) => Self::internal_error(e),
        }
    }
}

impl From<CuratorError> for ApiError {
    fn from(err: CuratorError) -> Self {
        match err {
            CuratorError::NotFound(_) => Self::not_found(err.to_string()),
            CuratorError::NotEligible { listing_id, status } => Self::with_details(
                "NOT_ELIGIBLE",
                err.to_string(),
                json!({ "listing_id": listing_id, "status": status }),
            ),
            CuratorError::AlreadyRecommended(listing_id) => Self::with_details(
                "ALREADY_RECOMMENDED",
                err.to_string(),
                json!({ "listing_id": listing_id }),
            ),
            CuratorError::ValidationError(msg) => Self::validation_error(msg),
            CuratorError::Internal(e) => Self::internal_error(e),
        }
    }
}

impl From<SettingsServiceError> for ApiError {
    fn from(err: SettingsServiceError) -> Self {
        match err {
            SettingsServiceError::ValidationError(msg) => Self::validation_error(msg),
            SettingsServiceError::Internal(e) => Self::internal_error(e),
        }
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::NotFound(_) => Self::not_found(err.to_string()),
            UserServiceError::ValidationError(msg) => Self::validation_error(msg),
            UserServiceError::UserExists(_)
            | UserServiceError::AlreadyBlocked(_)
            | UserServiceError::NotBlocked(_) => Self::conflict(err.to_string()),
            UserServiceError::Moderation(e) => e.into(),
            UserServiceError::InternalError(e) => Self::internal_error(e),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_error(err)
    }
}

/// Extract the bearer token from the Authorization header
fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Compare without short-circuiting on the first differing byte
fn tokens_match(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Admin authorization middleware
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        warn!(path = %request.uri().path(), "admin request refused: no admin token configured");
        return Err(ApiError::unauthorized("Admin access is not configured"));
    };

    let given = extract_bearer_token(&request)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;
    if !tokens_match(given, expected) {
        return Err(ApiError::unauthorized("Invalid authentication token"));
    }

    Ok(next.run(request).await)
}
