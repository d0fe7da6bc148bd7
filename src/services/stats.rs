//! Dashboard statistics
//!
//! Everything here is derived from filtered counts on each request.

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::config::ReportingConfig;
use crate::db::repositories::{EntityRepository, UserRepository};
use crate::models::{BlockFilter, Domain, EntityKind, ModerationStatus, Role};

/// `part / total` as a whole percentage, 0 when there is nothing to divide
pub fn percent(part: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (part as f64 / total as f64 * 100.0).round() as i64
}

/// Start instants of the "new since" buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    /// Local midnight in the reporting timezone
    pub today: DateTime<Utc>,
    /// Rolling seven days
    pub week: DateTime<Utc>,
    /// Rolling thirty days
    pub month: DateTime<Utc>,
}

impl ReportWindow {
    pub fn at(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let today = now
            .with_timezone(&offset)
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| offset.from_local_datetime(&midnight).earliest())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or(now);

        Self {
            today,
            week: now - Duration::days(7),
            month: now - Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    /// Every status except deleted
    pub total: i64,
    pub active: i64,
    pub pending: i64,
    pub rejected: i64,
    pub inactive: i64,
    pub expired: i64,
    pub new_today: i64,
    pub new_week: i64,
    pub new_month: i64,
    pub active_percent: i64,
}

impl EntityCounts {
    /// Element-wise sum with the percentage recomputed
    pub fn combine(&self, other: &Self) -> Self {
        let total = self.total + other.total;
        let active = self.active + other.active;
        Self {
            total,
            active,
            pending: self.pending + other.pending,
            rejected: self.rejected + other.rejected,
            inactive: self.inactive + other.inactive,
            expired: self.expired + other.expired,
            new_today: self.new_today + other.new_today,
            new_week: self.new_week + other.new_week,
            new_month: self.new_month + other.new_month,
            active_percent: percent(active, total),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DomainStats {
    pub listings: EntityCounts,
    pub requirements: EntityCounts,
}

impl DomainStats {
    pub fn combine(&self, other: &Self) -> Self {
        Self {
            listings: self.listings.combine(&other.listings),
            requirements: self.requirements.combine(&other.requirements),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserCounts {
    pub total: i64,
    /// Not blocked
    pub active: i64,
    pub blocked: i64,
    pub new_today: i64,
    pub new_week: i64,
    pub new_month: i64,
    pub active_percent: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub realty: DomainStats,
    pub auto: DomainStats,
    pub combined: DomainStats,
    pub users: UserCounts,
    pub generated_at: DateTime<Utc>,
}

pub struct StatsService {
    entities: Arc<dyn EntityRepository>,
    users: Arc<dyn UserRepository>,
    offset: FixedOffset,
}

impl StatsService {
    pub fn new(
        entities: Arc<dyn EntityRepository>,
        users: Arc<dyn UserRepository>,
        config: &ReportingConfig,
    ) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or(Utc.fix());
        Self {
            entities,
            users,
            offset,
        }
    }

    pub async fn platform_stats(&self) -> anyhow::Result<PlatformStats> {
        self.platform_stats_at(Utc::now()).await
    }

    pub async fn platform_stats_at(&self, now: DateTime<Utc>) -> anyhow::Result<PlatformStats> {
        let window = ReportWindow::at(now, self.offset);
        let realty = self.domain_stats(Domain::Realty, &window).await?;
        let auto = self.domain_stats(Domain::Auto, &window).await?;

        Ok(PlatformStats {
            combined: realty.combine(&auto),
            realty,
            auto,
            users: self.user_counts(&window).await?,
            generated_at: now,
        })
    }

    async fn domain_stats(
        &self,
        domain: Domain,
        window: &ReportWindow,
    ) -> anyhow::Result<DomainStats> {
        Ok(DomainStats {
            listings: self
                .entity_counts(EntityKind::new(domain, Role::Seller), window)
                .await?,
            requirements: self
                .entity_counts(EntityKind::new(domain, Role::Buyer), window)
                .await?,
        })
    }

    async fn entity_counts(
        &self,
        kind: EntityKind,
        window: &ReportWindow,
    ) -> anyhow::Result<EntityCounts> {
        let by_status = self.entities.count_by_status(kind).await?;
        let get = |status: ModerationStatus| by_status.get(&status).copied().unwrap_or(0);

        let total: i64 = by_status
            .iter()
            .filter(|(status, _)| **status != ModerationStatus::Deleted)
            .map(|(_, count)| count)
            .sum();
        let active = get(ModerationStatus::Active);

        Ok(EntityCounts {
            total,
            active,
            pending: get(ModerationStatus::PendingModeration),
            rejected: get(ModerationStatus::Rejected),
            inactive: get(ModerationStatus::Inactive),
            expired: get(ModerationStatus::Expired),
            new_today: self.entities.count_created_since(kind, window.today).await?,
            new_week: self.entities.count_created_since(kind, window.week).await?,
            new_month: self.entities.count_created_since(kind, window.month).await?,
            active_percent: percent(active, total),
        })
    }

    async fn user_counts(&self, window: &ReportWindow) -> anyhow::Result<UserCounts> {
        let total = self.users.count(BlockFilter::Any).await?;
        let blocked = self.users.count(BlockFilter::Blocked).await?;
        let active = total - blocked;

        Ok(UserCounts {
            total,
            active,
            blocked,
            new_today: self.users.count_created_since(window.today).await?,
            new_week: self.users.count_created_since(window.week).await?,
            new_month: self.users.count_created_since(window.month).await?,
            active_percent: percent(active, total),
        })
    }
}
