//! Moderation service
//!
//! Drives the status pipeline shared by listings and requirements in both
//! domains. Every change is validated against [`check_transition`] and then
//! applied as a compare-and-set; when another moderator wins the race the
//! entity is re-read and the change re-validated.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ModerationConfig;
use crate::db::repositories::{EntityRepository, StatusChange, UserRepository};
use crate::models::{
    check_transition, Actor, EntityKind, EntityRecord, ListParams, ModerationStatus, NewEntity,
    PagedResult, Role, StatusFilter, TransitionError,
};

/// Compare-and-set attempts before giving up with [`ModerationError::Conflict`]
const MAX_ATTEMPTS: usize = 3;

const MAX_REASON_LENGTH: usize = 1000;

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{kind} {id} was modified concurrently")]
    Conflict { kind: EntityKind, id: i64 },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Entities moved to `expired` by one sweep, keyed by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub expired: BTreeMap<&'static str, usize>,
    pub total: usize,
}

/// What blocking a user did to their entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SuspensionReport {
    /// Listings rejected because their owner was blocked
    pub listings_rejected: usize,
    /// Requirements paused because their owner was blocked
    pub requirements_paused: usize,
}

pub struct ModerationService {
    entities: Arc<dyn EntityRepository>,
    users: Arc<dyn UserRepository>,
    listing_expiry: Duration,
    requirement_expiry: Duration,
}

impl ModerationService {
    pub fn new(
        entities: Arc<dyn EntityRepository>,
        users: Arc<dyn UserRepository>,
        config: &ModerationConfig,
    ) -> Self {
        Self {
            entities,
            users,
            listing_expiry: Duration::days(config.listing_expiry_days as i64),
            requirement_expiry: Duration::days(config.requirement_expiry_days as i64),
        }
    }

    /// Accept a new listing or requirement into the moderation queue
    pub async fn submit(&self, input: NewEntity) -> Result<EntityRecord, ModerationError> {
        input.details.validate().map_err(ModerationError::ValidationError)?;

        let owner = self
            .users
            .get(input.user_id)
            .await?
            .ok_or(ModerationError::UserNotFound(input.user_id))?;
        if owner.is_blocked {
            return Err(ModerationError::ValidationError(format!(
                "user {} is blocked",
                owner.id
            )));
        }

        let record = self.entities.create(&input, Utc::now()).await?;
        info!(kind = %record.kind(), id = record.id, user_id = record.user_id, "entity submitted");
        Ok(record)
    }

    pub async fn get(&self, kind: EntityKind, id: i64) -> Result<EntityRecord, ModerationError> {
        self.entities
            .get(kind, id)
            .await?
            .ok_or(ModerationError::NotFound { kind, id })
    }

    /// Newest first. `StatusFilter::All` leaves out deleted entities.
    pub async fn list(
        &self,
        kind: EntityKind,
        filter: StatusFilter,
        params: &ListParams,
    ) -> Result<PagedResult<EntityRecord>, ModerationError> {
        let items = self.entities.list(kind, filter, params).await?;
        let total = self.entities.count(kind, filter).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Pending entities, oldest first
    pub async fn queue(
        &self,
        kind: EntityKind,
        params: &ListParams,
    ) -> Result<PagedResult<EntityRecord>, ModerationError> {
        let items = self.entities.list_pending(kind, params).await?;
        let total = self
            .entities
            .count(kind, StatusFilter::Only(ModerationStatus::PendingModeration))
            .await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Apply an operator-requested status change
    pub async fn change_status(
        &self,
        kind: EntityKind,
        id: i64,
        to: ModerationStatus,
        reason: Option<String>,
    ) -> Result<EntityRecord, ModerationError> {
        self.transition(kind, id, to, reason, Actor::Operator, Utc::now())
            .await
    }

    pub async fn approve(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> Result<EntityRecord, ModerationError> {
        self.change_status(kind, id, ModerationStatus::Active, None)
            .await
    }

    pub async fn reject(
        &self,
        kind: EntityKind,
        id: i64,
        reason: String,
    ) -> Result<EntityRecord, ModerationError> {
        self.change_status(kind, id, ModerationStatus::Rejected, Some(reason))
            .await
    }

    pub async fn delete(&self, kind: EntityKind, id: i64) -> Result<EntityRecord, ModerationError> {
        self.change_status(kind, id, ModerationStatus::Deleted, None)
            .await
    }

    /// Move every active entity whose expiry has passed to `expired`.
    ///
    /// Entities an operator touched between the scan and the update are
    /// skipped rather than reported as failures.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<ExpiryReport, ModerationError> {
        let mut report = ExpiryReport::default();

        for kind in EntityKind::ALL {
            let mut expired = 0;
            for id in self.entities.ids_due_for_expiry(kind, now).await? {
                match self
                    .transition(kind, id, ModerationStatus::Expired, None, Actor::Scheduler, now)
                    .await
                {
                    Ok(_) => expired += 1,
                    Err(
                        err @ (ModerationError::InvalidTransition(_)
                        | ModerationError::NotFound { .. }
                        | ModerationError::Conflict { .. }),
                    ) => {
                        debug!(%kind, id, error = %err, "skipping expiry");
                    }
                    Err(err) => return Err(err),
                }
            }
            report.expired.insert(kind.as_str(), expired);
            report.total += expired;
        }

        if report.total > 0 {
            info!(total = report.total, "expired entities");
        }
        Ok(report)
    }

    /// Take a blocked user's entities out of circulation.
    ///
    /// Listings can only leave `active` or `pending_moderation` through
    /// rejection, so they are rejected with the block reason. Active
    /// requirements are paused.
    pub async fn suspend_owner(
        &self,
        user_id: i64,
        reason: Option<&str>,
    ) -> Result<SuspensionReport, ModerationError> {
        let mut report = SuspensionReport::default();
        let rejection = match reason {
            Some(reason) if !reason.trim().is_empty() => {
                format!("owner blocked: {}", reason.trim())
            }
            _ => "owner blocked".to_string(),
        };

        for kind in EntityKind::ALL {
            let (statuses, to): (&[ModerationStatus], ModerationStatus) = match kind.role() {
                Role::Seller => (
                    &[ModerationStatus::PendingModeration, ModerationStatus::Active],
                    ModerationStatus::Rejected,
                ),
                Role::Buyer => (&[ModerationStatus::Active], ModerationStatus::Inactive),
            };

            for status in statuses {
                let ids = self
                    .entities
                    .ids_by_user_and_status(kind, user_id, *status)
                    .await?;
                for id in ids {
                    let reason = (to == ModerationStatus::Rejected).then(|| rejection.clone());
                    match self
                        .transition(kind, id, to, reason, Actor::Operator, Utc::now())
                        .await
                    {
                        Ok(_) if to == ModerationStatus::Rejected => report.listings_rejected += 1,
                        Ok(_) => report.requirements_paused += 1,
                        Err(
                            err @ (ModerationError::InvalidTransition(_)
                            | ModerationError::NotFound { .. }),
                        ) => {
                            debug!(%kind, id, error = %err, "entity moved before suspension");
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        info!(
            user_id,
            listings_rejected = report.listings_rejected,
            requirements_paused = report.requirements_paused,
            "suspended owner entities"
        );
        Ok(report)
    }

    async fn transition(
        &self,
        kind: EntityKind,
        id: i64,
        to: ModerationStatus,
        reason: Option<String>,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<EntityRecord, ModerationError> {
        let reason = if to == ModerationStatus::Rejected {
            Some(validate_reason(reason)?)
        } else {
            None
        };

        for attempt in 1..=MAX_ATTEMPTS {
            let current = self.get(kind, id).await?;
            check_transition(kind, current.status, to, actor)?;
            if to == ModerationStatus::Active {
                self.ensure_owner_not_blocked(current.user_id).await?;
            }

            let change = self.build_change(&current, to, reason.clone(), now);
            let outcome = self.entities.transition(&change).await?;
            if outcome.applied {
                info!(
                    %kind,
                    id,
                    from = %current.status,
                    to = %to,
                    ?actor,
                    removed_recommendations = outcome.removed_recommendations,
                    "status changed"
                );
                return Ok(apply_change(current, &change));
            }

            debug!(%kind, id, attempt, "status changed underneath, retrying");
        }

        Err(ModerationError::Conflict { kind, id })
    }

    async fn ensure_owner_not_blocked(&self, user_id: i64) -> Result<(), ModerationError> {
        let owner = self
            .users
            .get(user_id)
            .await?
            .ok_or(ModerationError::UserNotFound(user_id))?;
        if owner.is_blocked {
            return Err(ModerationError::ValidationError(format!(
                "user {} is blocked",
                user_id
            )));
        }
        Ok(())
    }

    fn build_change(
        &self,
        current: &EntityRecord,
        to: ModerationStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> StatusChange {
        let kind = current.kind();
        let (rejection_reason, expires_at) = match (current.status, to) {
            (ModerationStatus::PendingModeration, ModerationStatus::Active) => {
                let period = match kind.role() {
                    Role::Seller => self.listing_expiry,
                    Role::Buyer => self.requirement_expiry,
                };
                (Some(None), Some(Some(now + period)))
            }
            (_, ModerationStatus::Rejected) => (Some(reason), None),
            _ => (None, None),
        };

        StatusChange {
            kind,
            id: current.id,
            from: current.status,
            to,
            rejection_reason,
            expires_at,
            at: now,
        }
    }
}

fn validate_reason(reason: Option<String>) -> Result<String, ModerationError> {
    let reason = reason.map(|r| r.trim().to_string()).unwrap_or_default();
    if reason.is_empty() {
        return Err(ModerationError::ValidationError(
            "a rejection reason is required".to_string(),
        ));
    }
    if reason.chars().count() > MAX_REASON_LENGTH {
        return Err(ModerationError::ValidationError(format!(
            "rejection reason must be at most {} characters",
            MAX_REASON_LENGTH
        )));
    }
    Ok(reason)
}

fn apply_change(mut record: EntityRecord, change: &StatusChange) -> EntityRecord {
    record.status = change.to;
    if let Some(reason) = &change.rejection_reason {
        record.rejection_reason = reason.clone();
    }
    if let Some(expires_at) = change.expires_at {
        record.expires_at = expires_at;
    }
    record.updated_at = change.at;
    record
}
