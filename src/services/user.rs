//! User service
//!
//! Account administration: listing with usage counters, blocking and
//! per-user publication limits.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::is_unique_violation;
use crate::db::repositories::UserRepository;
use crate::models::{
    BlockFilter, CreateUserInput, ListParams, PagedResult, User, UserLimits, UserSummary,
};
use crate::services::moderation::{ModerationError, ModerationService, SuspensionReport};

const MAX_BLOCK_REASON_LENGTH: usize = 500;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("User {0} not found")]
    NotFound(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User {0} is already blocked")]
    AlreadyBlocked(i64),

    #[error("User {0} is not blocked")]
    NotBlocked(i64),

    #[error(transparent)]
    Moderation(#[from] ModerationError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockOutcome {
    pub user: User,
    #[serde(flatten)]
    pub suspended: SuspensionReport,
}

pub struct UserService {
    users: Arc<dyn UserRepository>,
    moderation: Arc<ModerationService>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>, moderation: Arc<ModerationService>) -> Self {
        Self { users, moderation }
    }

    pub async fn create(&self, input: CreateUserInput) -> Result<User, UserServiceError> {
        let email = input.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(UserServiceError::ValidationError(
                "a valid email is required".to_string(),
            ));
        }
        if input.name.trim().is_empty() {
            return Err(UserServiceError::ValidationError(
                "name must not be empty".to_string(),
            ));
        }

        match self.users.create(&input, Utc::now()).await {
            Ok(user) => Ok(user),
            Err(err)
                if err
                    .downcast_ref::<sqlx::Error>()
                    .is_some_and(is_unique_violation) =>
            {
                Err(UserServiceError::UserExists(email.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get(&self, id: i64) -> Result<User, UserServiceError> {
        self.users.get(id).await?.ok_or(UserServiceError::NotFound(id))
    }

    pub async fn list(
        &self,
        filter: BlockFilter,
        params: &ListParams,
    ) -> Result<PagedResult<UserSummary>, UserServiceError> {
        let items = self.users.list(filter, params).await?;
        let total = self.users.count(filter).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Block a user and take their listings and requirements out of circulation.
    ///
    /// The flag is set before the cascade so the user cannot submit while it
    /// runs. Blocking an already blocked user re-runs the cascade, which
    /// finishes one that was interrupted; when there was nothing left to
    /// suspend the call fails with `AlreadyBlocked`.
    pub async fn block(
        &self,
        id: i64,
        reason: Option<String>,
    ) -> Result<BlockOutcome, UserServiceError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if reason
            .as_ref()
            .is_some_and(|r| r.chars().count() > MAX_BLOCK_REASON_LENGTH)
        {
            return Err(UserServiceError::ValidationError(format!(
                "block reason must be at most {} characters",
                MAX_BLOCK_REASON_LENGTH
            )));
        }

        let user = self.get(id).await?;
        let newly_blocked = !user.is_blocked
            && self
                .users
                .set_blocked(id, true, reason.as_deref(), Utc::now())
                .await?;

        if !newly_blocked {
            let user = self.get(id).await?;
            let suspended = self
                .moderation
                .suspend_owner(id, user.blocked_reason.as_deref())
                .await?;
            if suspended == SuspensionReport::default() {
                return Err(UserServiceError::AlreadyBlocked(id));
            }
            warn!(user_id = id, ?suspended, "finished an interrupted block");
            return Ok(BlockOutcome { user, suspended });
        }

        let suspended = self.moderation.suspend_owner(id, reason.as_deref()).await?;
        info!(user_id = id, reason = ?reason, "user blocked");

        Ok(BlockOutcome {
            user: self.get(id).await?,
            suspended,
        })
    }

    /// Lift a block. Entities suspended by the block stay as they are.
    pub async fn unblock(&self, id: i64) -> Result<User, UserServiceError> {
        let user = self.get(id).await?;
        if !user.is_blocked || !self.users.set_blocked(id, false, None, Utc::now()).await? {
            return Err(UserServiceError::NotBlocked(id));
        }
        info!(user_id = id, "user unblocked");
        self.get(id).await
    }

    pub async fn set_limits(&self, id: i64, limits: UserLimits) -> Result<User, UserServiceError> {
        for (name, value) in [
            ("listings_limit", limits.listings_limit),
            ("requirements_limit", limits.requirements_limit),
        ] {
            if value.is_some_and(|v| v < 0) {
                return Err(UserServiceError::ValidationError(format!(
                    "{} must not be negative",
                    name
                )));
            }
        }

        if !self.users.set_limits(id, &limits, Utc::now()).await? {
            return Err(UserServiceError::NotFound(id));
        }
        info!(user_id = id, ?limits, "user limits updated");
        self.get(id).await
    }
}
