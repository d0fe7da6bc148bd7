//! Listing and requirement repository
//!
//! One repository serves all four entity kinds; the kind selects the table
//! and the detail columns. Status changes are compare-and-set so concurrent
//! moderators never overwrite each other silently.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;

use super::InsertId;
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{
    AutoListingDetails, AutoRequirementDetails, EntityDetails, EntityKind, EntityRecord,
    ListParams, ModerationStatus, NewEntity, RealtyListingDetails, RealtyRequirementDetails,
    StatusFilter,
};

/// A status change to apply if the row is still in `from`
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub kind: EntityKind,
    pub id: i64,
    pub from: ModerationStatus,
    pub to: ModerationStatus,
    /// `None` keeps the stored reason, `Some(None)` clears it
    pub rejection_reason: Option<Option<String>>,
    /// `None` keeps the stored expiry, `Some(None)` clears it
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionOutcome {
    /// False when the row was no longer in the expected status
    pub applied: bool,
    /// Recommended entries dropped along with a deleted listing
    pub removed_recommendations: u64,
}

#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Insert a new entity in `pending_moderation`
    async fn create(&self, input: &NewEntity, now: DateTime<Utc>) -> Result<EntityRecord>;
    async fn get(&self, kind: EntityKind, id: i64) -> Result<Option<EntityRecord>>;
    /// Newest first
    async fn list(
        &self,
        kind: EntityKind,
        filter: StatusFilter,
        params: &ListParams,
    ) -> Result<Vec<EntityRecord>>;
    /// Pending entities, oldest first
    async fn list_pending(&self, kind: EntityKind, params: &ListParams)
        -> Result<Vec<EntityRecord>>;
    async fn count(&self, kind: EntityKind, filter: StatusFilter) -> Result<i64>;
    /// Row counts per status, including `deleted`
    async fn count_by_status(&self, kind: EntityKind) -> Result<HashMap<ModerationStatus, i64>>;
    /// Non-deleted entities created at or after `since`
    async fn count_created_since(&self, kind: EntityKind, since: DateTime<Utc>) -> Result<i64>;
    /// Active entities whose expiry is at or before `now`
    async fn ids_due_for_expiry(&self, kind: EntityKind, now: DateTime<Utc>) -> Result<Vec<i64>>;
    async fn ids_by_user_and_status(
        &self,
        kind: EntityKind,
        user_id: i64,
        status: ModerationStatus,
    ) -> Result<Vec<i64>>;
    /// Apply a compare-and-set status change in one transaction
    async fn transition(&self, change: &StatusChange) -> Result<TransitionOutcome>;
}

pub struct SqlxEntityRepository {
    pool: DynDatabasePool,
}

impl SqlxEntityRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn EntityRepository> {
        Arc::new(Self::new(pool))
    }
}

const COMMON_COLUMNS: &str =
    "id, user_id, status, rejection_reason, expires_at, created_at, updated_at";

fn detail_columns(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Listing => &[
            "price",
            "rooms",
            "area",
            "floor",
            "building_floors",
            "description",
        ],
        EntityKind::Requirement => &[
            "deal_type",
            "price_min",
            "price_max",
            "rooms_min",
            "rooms_max",
            "area_min",
            "area_max",
        ],
        EntityKind::AutoListing => &[
            "deal_type", "brand", "model", "year", "mileage", "price", "city",
        ],
        EntityKind::AutoRequirement => &[
            "deal_type",
            "brands",
            "year_min",
            "year_max",
            "price_min",
            "price_max",
            "mileage_max",
            "city",
        ],
    }
}

fn select_sql(kind: EntityKind, tail: &str) -> String {
    format!(
        "SELECT {}, {} FROM {} {}",
        COMMON_COLUMNS,
        detail_columns(kind).join(", "),
        kind.table(),
        tail
    )
}

fn insert_sql(kind: EntityKind) -> String {
    let details = detail_columns(kind);
    let placeholders = vec!["?"; 4 + details.len()].join(", ");
    format!(
        "INSERT INTO {} (user_id, status, created_at, updated_at, {}) VALUES ({})",
        kind.table(),
        details.join(", "),
        placeholders
    )
}

/// `All` hides deleted rows; both arms bind exactly one status value.
fn status_clause(filter: StatusFilter) -> (&'static str, &'static str) {
    match filter {
        StatusFilter::All => ("status <> ?", ModerationStatus::Deleted.as_str()),
        StatusFilter::Only(status) => ("status = ?", status.as_str()),
    }
}

fn encode_brands(details: &AutoRequirementDetails) -> String {
    serde_json::to_string(&details.brands).unwrap_or_else(|_| "[]".to_string())
}

macro_rules! bind_details {
    ($query:ident, $details:expr) => {
        match $details {
            EntityDetails::Listing(d) => $query
                .bind(d.price)
                .bind(d.rooms)
                .bind(d.area)
                .bind(d.floor)
                .bind(d.building_floors)
                .bind(d.description.clone()),
            EntityDetails::Requirement(d) => $query
                .bind(d.deal_type.as_str())
                .bind(d.price_min)
                .bind(d.price_max)
                .bind(d.rooms_min)
                .bind(d.rooms_max)
                .bind(d.area_min)
                .bind(d.area_max),
            EntityDetails::AutoListing(d) => $query
                .bind(d.deal_type.as_str())
                .bind(d.brand.trim().to_string())
                .bind(d.model.trim().to_string())
                .bind(d.year)
                .bind(d.mileage)
                .bind(d.price)
                .bind(d.city.trim().to_string()),
            EntityDetails::AutoRequirement(d) => $query
                .bind(d.deal_type.as_str())
                .bind(encode_brands(d))
                .bind(d.year_min)
                .bind(d.year_max)
                .bind(d.price_min)
                .bind(d.price_max)
                .bind(d.mileage_max)
                .bind(d.city.clone()),
        }
    };
}

macro_rules! entity_from_row {
    ($kind:expr, $row:expr) => {{
        let row = $row;
        let details = match $kind {
            EntityKind::Listing => EntityDetails::Listing(RealtyListingDetails {
                price: row.try_get("price")?,
                rooms: row.try_get("rooms")?,
                area: row.try_get("area")?,
                floor: row.try_get("floor")?,
                building_floors: row.try_get("building_floors")?,
                description: row.try_get("description")?,
            }),
            EntityKind::Requirement => EntityDetails::Requirement(RealtyRequirementDetails {
                deal_type: row.try_get::<String, _>("deal_type")?.parse()?,
                price_min: row.try_get("price_min")?,
                price_max: row.try_get("price_max")?,
                rooms_min: row.try_get("rooms_min")?,
                rooms_max: row.try_get("rooms_max")?,
                area_min: row.try_get("area_min")?,
                area_max: row.try_get("area_max")?,
            }),
            EntityKind::AutoListing => EntityDetails::AutoListing(AutoListingDetails {
                deal_type: row.try_get::<String, _>("deal_type")?.parse()?,
                brand: row.try_get("brand")?,
                model: row.try_get("model")?,
                year: row.try_get("year")?,
                mileage: row.try_get("mileage")?,
                price: row.try_get("price")?,
                city: row.try_get("city")?,
            }),
            EntityKind::AutoRequirement => EntityDetails::AutoRequirement(AutoRequirementDetails {
                deal_type: row.try_get::<String, _>("deal_type")?.parse()?,
                brands: serde_json::from_str(&row.try_get::<String, _>("brands")?)
                    .context("Invalid brands column")?,
                year_min: row.try_get("year_min")?,
                year_max: row.try_get("year_max")?,
                price_min: row.try_get("price_min")?,
                price_max: row.try_get("price_max")?,
                mileage_max: row.try_get("mileage_max")?,
                city: row.try_get("city")?,
            }),
        };
        EntityRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            rejection_reason: row.try_get("rejection_reason")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            details,
        }
    }};
}

// SQL is written with `?` placeholders only, so one body serves both drivers.
macro_rules! entity_queries {
    ($driver:ident, $pool:ty) => {
        mod $driver {
            use super::*;

            pub(super) async fn create(
                pool: &$pool,
                input: &NewEntity,
                now: DateTime<Utc>,
            ) -> Result<i64> {
                let kind = input.details.kind();
                let sql = insert_sql(kind);
                let query = sqlx::query(&sql)
                    .bind(input.user_id)
                    .bind(ModerationStatus::PendingModeration.as_str())
                    .bind(now)
                    .bind(now);
                let query = bind_details!(query, &input.details);
                let result = query
                    .execute(pool)
                    .await
                    .with_context(|| format!("Failed to insert {}", kind))?;
                Ok(result.inserted_id())
            }

            pub(super) async fn get(
                pool: &$pool,
                kind: EntityKind,
                id: i64,
            ) -> Result<Option<EntityRecord>> {
                let sql = select_sql(kind, "WHERE id = ?");
                let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
                match row {
                    Some(row) => Ok(Some(entity_from_row!(kind, row))),
                    None => Ok(None),
                }
            }

            pub(super) async fn list(
                pool: &$pool,
                kind: EntityKind,
                filter: StatusFilter,
                params: &ListParams,
            ) -> Result<Vec<EntityRecord>> {
                let (clause, status) = status_clause(filter);
                let sql = select_sql(
                    kind,
                    &format!(
                        "WHERE {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
                        clause
                    ),
                );
                let rows = sqlx::query(&sql)
                    .bind(status)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await?;
                let mut records = Vec::with_capacity(rows.len());
                for row in rows {
                    records.push(entity_from_row!(kind, row));
                }
                Ok(records)
            }

            pub(super) async fn list_pending(
                pool: &$pool,
                kind: EntityKind,
                params: &ListParams,
            ) -> Result<Vec<EntityRecord>> {
                let sql = select_sql(
                    kind,
                    "WHERE status = ? ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
                );
                let rows = sqlx::query(&sql)
                    .bind(ModerationStatus::PendingModeration.as_str())
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await?;
                let mut records = Vec::with_capacity(rows.len());
                for row in rows {
                    records.push(entity_from_row!(kind, row));
                }
                Ok(records)
            }

            pub(super) async fn count(
                pool: &$pool,
                kind: EntityKind,
                filter: StatusFilter,
            ) -> Result<i64> {
                let (clause, status) = status_clause(filter);
                let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", kind.table(), clause);
                let count: i64 = sqlx::query_scalar(&sql)
                    .bind(status)
                    .fetch_one(pool)
                    .await?;
                Ok(count)
            }

            pub(super) async fn count_by_status(
                pool: &$pool,
                kind: EntityKind,
            ) -> Result<HashMap<ModerationStatus, i64>> {
                let sql = format!(
                    "SELECT status, COUNT(*) AS cnt FROM {} GROUP BY status",
                    kind.table()
                );
                let rows = sqlx::query(&sql).fetch_all(pool).await?;
                let mut counts = HashMap::new();
                for row in rows {
                    let status: ModerationStatus = row.try_get::<String, _>("status")?.parse()?;
                    counts.insert(status, row.try_get::<i64, _>("cnt")?);
                }
                Ok(counts)
            }

            pub(super) async fn count_created_since(
                pool: &$pool,
                kind: EntityKind,
                since: DateTime<Utc>,
            ) -> Result<i64> {
                let sql = format!(
                    "SELECT COUNT(*) FROM {} WHERE status <> ? AND created_at >= ?",
                    kind.table()
                );
                let count: i64 = sqlx::query_scalar(&sql)
                    .bind(ModerationStatus::Deleted.as_str())
                    .bind(since)
                    .fetch_one(pool)
                    .await?;
                Ok(count)
            }

            pub(super) async fn ids_due_for_expiry(
                pool: &$pool,
                kind: EntityKind,
                now: DateTime<Utc>,
            ) -> Result<Vec<i64>> {
                let sql = format!(
                    "SELECT id FROM {} WHERE status = ? AND expires_at IS NOT NULL AND expires_at <= ? ORDER BY id",
                    kind.table()
                );
                let ids: Vec<i64> = sqlx::query_scalar(&sql)
                    .bind(ModerationStatus::Active.as_str())
                    .bind(now)
                    .fetch_all(pool)
                    .await?;
                Ok(ids)
            }

            pub(super) async fn ids_by_user_and_status(
                pool: &$pool,
                kind: EntityKind,
                user_id: i64,
                status: ModerationStatus,
            ) -> Result<Vec<i64>> {
                let sql = format!(
                    "SELECT id FROM {} WHERE user_id = ? AND status = ? ORDER BY id",
                    kind.table()
                );
                let ids: Vec<i64> = sqlx::query_scalar(&sql)
                    .bind(user_id)
                    .bind(status.as_str())
                    .fetch_all(pool)
                    .await?;
                Ok(ids)
            }

            pub(super) async fn transition(
                pool: &$pool,
                change: &StatusChange,
            ) -> Result<TransitionOutcome> {
                let sql = format!(
                    "UPDATE {} SET status = ?, \
                     rejection_reason = CASE WHEN ? THEN ? ELSE rejection_reason END, \
                     expires_at = CASE WHEN ? THEN ? ELSE expires_at END, \
                     updated_at = ? \
                     WHERE id = ? AND status = ?",
                    change.kind.table()
                );

                let mut tx = pool.begin().await?;
                let updated = sqlx::query(&sql)
                    .bind(change.to.as_str())
                    .bind(change.rejection_reason.is_some())
                    .bind(change.rejection_reason.clone().flatten())
                    .bind(change.expires_at.is_some())
                    .bind(change.expires_at.flatten())
                    .bind(change.at)
                    .bind(change.id)
                    .bind(change.from.as_str())
                    .execute(&mut *tx)
                    .await
                    .with_context(|| {
                        format!("Failed to move {} {} to {}", change.kind, change.id, change.to)
                    })?
                    .rows_affected();

                if updated == 0 {
                    tx.rollback().await?;
                    return Ok(TransitionOutcome::default());
                }

                let mut removed = 0;
                if change.kind == EntityKind::Listing && change.to == ModerationStatus::Deleted {
                    removed = sqlx::query("DELETE FROM recommended_listings WHERE listing_id = ?")
                        .bind(change.id)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                    sqlx::query("DELETE FROM recommended_backup WHERE listing_id = ?")
                        .bind(change.id)
                        .execute(&mut *tx)
                        .await?;
                }

                tx.commit().await?;
                Ok(TransitionOutcome {
                    applied: true,
                    removed_recommendations: removed,
                })
            }
        }
    };
}

entity_queries!(sqlite, sqlx::SqlitePool);
entity_queries!(mysql, sqlx::MySqlPool);

#[async_trait]
impl EntityRepository for SqlxEntityRepository {
    async fn create(&self, input: &NewEntity, now: DateTime<Utc>) -> Result<EntityRecord> {
        let kind = input.details.kind();
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::create(self.pool.sqlite()?, input, now).await?,
            DatabaseDriver::Mysql => mysql::create(self.pool.mysql()?, input, now).await?,
        };
        self.get(kind, id)
            .await?
            .with_context(|| format!("{} {} missing after insert", kind, id))
    }

    async fn get(&self, kind: EntityKind, id: i64) -> Result<Option<EntityRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::get(self.pool.sqlite()?, kind, id).await,
            DatabaseDriver::Mysql => mysql::get(self.pool.mysql()?, kind, id).await,
        }
    }

    async fn list(
        &self,
        kind: EntityKind,
        filter: StatusFilter,
        params: &ListParams,
    ) -> Result<Vec<EntityRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::list(self.pool.sqlite()?, kind, filter, params).await,
            DatabaseDriver::Mysql => mysql::list(self.pool.mysql()?, kind, filter, params).await,
        }
    }

    async fn list_pending(
        &self,
        kind: EntityKind,
        params: &ListParams,
    ) -> Result<Vec<EntityRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::list_pending(self.pool.sqlite()?, kind, params).await,
            DatabaseDriver::Mysql => mysql::list_pending(self.pool.mysql()?, kind, params).await,
        }
    }

    async fn count(&self, kind: EntityKind, filter: StatusFilter) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::count(self.pool.sqlite()?, kind, filter).await,
            DatabaseDriver::Mysql => mysql::count(self.pool.mysql()?, kind, filter).await,
        }
    }

    async fn count_by_status(&self, kind: EntityKind) -> Result<HashMap<ModerationStatus, i64>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::count_by_status(self.pool.sqlite()?, kind).await,
            DatabaseDriver::Mysql => mysql::count_by_status(self.pool.mysql()?, kind).await,
        }
    }

    async fn count_created_since(&self, kind: EntityKind, since: DateTime<Utc>) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlite::count_created_since(self.pool.sqlite()?, kind, since).await
            }
            DatabaseDriver::Mysql => {
                mysql::count_created_since(self.pool.mysql()?, kind, since).await
            }
        }
    }

    async fn ids_due_for_expiry(&self, kind: EntityKind, now: DateTime<Utc>) -> Result<Vec<i64>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlite::ids_due_for_expiry(self.pool.sqlite()?, kind, now).await
            }
            DatabaseDriver::Mysql => mysql::ids_due_for_expiry(self.pool.mysql()?, kind, now).await,
        }
    }

    async fn ids_by_user_and_status(
        &self,
        kind: EntityKind,
        user_id: i64,
        status: ModerationStatus,
    ) -> Result<Vec<i64>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlite::ids_by_user_and_status(self.pool.sqlite()?, kind, user_id, status).await
            }
            DatabaseDriver::Mysql => {
                mysql::ids_by_user_and_status(self.pool.mysql()?, kind, user_id, status).await
            }
        }
    }

    async fn transition(&self, change: &StatusChange) -> Result<TransitionOutcome> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::transition(self.pool.sqlite()?, change).await,
            DatabaseDriver::Mysql => mysql::transition(self.pool.mysql()?, change).await,
        }
    }
}
