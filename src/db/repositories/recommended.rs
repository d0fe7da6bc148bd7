//! Recommended listings repository
//!
//! Every mutation of the recommended set runs in a single transaction whose
//! first statement is a write, so concurrent writers queue on the database
//! lock instead of failing to upgrade a read lock. The random-mode flag lives
//! in `settings` and is written in the same transaction as the entries it
//! describes.
//!
//! A random replacement keeps a one-step backup of the previous set. Any
//! later manual change (add, remove, reorder, disabling random mode) drops
//! that backup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashSet;
use std::sync::Arc;

use super::settings::{RECOMMENDED_BACKUP_AT, RECOMMENDED_RANDOM_MODE, UPSERT_MYSQL, UPSERT_SQLITE};
use super::InsertId;
use crate::config::DatabaseDriver;
use crate::db::{is_unique_violation, DynDatabasePool};
use crate::models::{
    ListingSnapshot, ModerationStatus, RealtyListingDetails, RecommendedEntry, RecommendedListing,
};

#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Added(RecommendedEntry),
    ListingNotFound,
    NotEligible(ModerationStatus),
    AlreadyRecommended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    Applied,
    /// An id that is not in the current set
    UnknownEntry(i64),
    /// The request left out this many current entries
    MissingEntries(usize),
}

#[async_trait]
pub trait RecommendedRepository: Send + Sync {
    /// All entries joined with their listings, in display order
    async fn list_with_listings(&self) -> Result<Vec<RecommendedListing>>;
    /// Active listings not yet recommended, newest first
    async fn list_available(&self, limit: i64) -> Result<Vec<ListingSnapshot>>;
    /// Ids of every active listing
    async fn active_listing_ids(&self) -> Result<Vec<i64>>;
    /// Entries added by hand rather than by random selection
    async fn count_manual(&self) -> Result<i64>;
    /// Append a listing at the end of the set after checking eligibility
    async fn append(&self, listing_id: i64, now: DateTime<Utc>) -> Result<AppendOutcome>;
    /// Returns false when no entry had this id
    async fn remove(&self, entry_id: i64) -> Result<bool>;
    /// Rewrite positions to follow `entry_ids`
    async fn reorder(&self, entry_ids: &[i64]) -> Result<ReorderOutcome>;
    /// Back up the current set, then replace it with random entries for the
    /// given listings and turn random mode on. Returns the inserted entry count.
    async fn replace_with_random(&self, listing_ids: &[i64], now: DateTime<Utc>) -> Result<usize>;
    /// Put the backed-up set back and turn random mode off.
    /// `None` when there is no backup.
    async fn restore_backup(&self, now: DateTime<Utc>) -> Result<Option<usize>>;
    /// Turn random mode off, optionally deleting random entries.
    /// Returns the number of entries deleted.
    async fn disable_random(&self, clear: bool, now: DateTime<Utc>) -> Result<u64>;
    async fn random_mode(&self) -> Result<bool>;
}

pub struct SqlxRecommendedRepository {
    pool: DynDatabasePool,
}

impl SqlxRecommendedRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn RecommendedRepository> {
        Arc::new(Self::new(pool))
    }
}

const LIST_WITH_LISTINGS_SQL: &str = r#"
    SELECT r.id AS entry_id, r.listing_id, r.position, r.is_random, r.created_at AS entry_created_at,
           l.user_id, l.status, l.created_at AS listing_created_at,
           l.price, l.rooms, l.area, l.floor, l.building_floors, l.description
    FROM recommended_listings r
    JOIN listings l ON l.id = r.listing_id
    ORDER BY r.position ASC, r.created_at ASC, r.id ASC
"#;

const LIST_AVAILABLE_SQL: &str = r#"
    SELECT l.id AS listing_id, l.user_id, l.status, l.created_at AS listing_created_at,
           l.price, l.rooms, l.area, l.floor, l.building_floors, l.description
    FROM listings l
    WHERE l.status = ?
      AND NOT EXISTS (SELECT 1 FROM recommended_listings r WHERE r.listing_id = l.id)
    ORDER BY l.created_at DESC, l.id DESC
    LIMIT ?
"#;

const BACKUP_CURRENT_SQL: &str = r#"
    INSERT INTO recommended_backup (listing_id, position, is_random, created_at, backed_up_at)
    SELECT listing_id, position, is_random, created_at, ? FROM recommended_listings
"#;

const RESTORE_BACKUP_SQL: &str = r#"
    INSERT INTO recommended_listings (listing_id, position, is_random, created_at)
    SELECT b.listing_id, b.position, b.is_random, b.created_at
    FROM recommended_backup b
    JOIN listings l ON l.id = b.listing_id
    WHERE l.status <> ?
"#;

// Appends only when the listing is active and not yet recommended; zero
// affected rows means one of those checks failed.
const APPEND_SQL: &str = r#"
    INSERT INTO recommended_listings (listing_id, position, is_random, created_at)
    SELECT l.id, (SELECT COALESCE(MAX(r.position), -1) + 1 FROM recommended_listings r), ?, ?
    FROM listings l
    WHERE l.id = ? AND l.status = ?
      AND NOT EXISTS (SELECT 1 FROM recommended_listings e WHERE e.listing_id = l.id)
"#;

// Backticks quote `key` on both SQLite and MySQL
const SETTING_VALUE_SQL: &str = "SELECT value FROM settings WHERE `key` = ?";
const DELETE_SETTING_SQL: &str = "DELETE FROM settings WHERE `key` = ?";

macro_rules! snapshot_from_row {
    ($row:expr) => {{
        let row = $row;
        ListingSnapshot {
            id: row.try_get("listing_id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            created_at: row.try_get("listing_created_at")?,
            details: RealtyListingDetails {
                price: row.try_get("price")?,
                rooms: row.try_get("rooms")?,
                area: row.try_get("area")?,
                floor: row.try_get("floor")?,
                building_floors: row.try_get("building_floors")?,
                description: row.try_get("description")?,
            },
        }
    }};
}

/// Forget the undo backup; any manual change after a random draw makes it stale
macro_rules! drop_backup {
    ($tx:ident) => {
        sqlx::query("DELETE FROM recommended_backup")
            .execute(&mut *$tx)
            .await?;
        sqlx::query(DELETE_SETTING_SQL)
            .bind(RECOMMENDED_BACKUP_AT)
            .execute(&mut *$tx)
            .await?;
    };
}

macro_rules! recommended_queries {
    ($driver:ident, $pool:ty, $upsert:expr) => {
        mod $driver {
            use super::*;

            pub(super) async fn list_with_listings(
                pool: &$pool,
            ) -> Result<Vec<RecommendedListing>> {
                let rows = sqlx::query(LIST_WITH_LISTINGS_SQL).fetch_all(pool).await?;
                let mut items = Vec::with_capacity(rows.len());
                for row in rows {
                    let entry = RecommendedEntry {
                        id: row.try_get("entry_id")?,
                        listing_id: row.try_get("listing_id")?,
                        position: row.try_get("position")?,
                        is_random: row.try_get("is_random")?,
                        created_at: row.try_get("entry_created_at")?,
                    };
                    let listing = snapshot_from_row!(&row);
                    items.push(RecommendedListing { entry, listing });
                }
                Ok(items)
            }

            pub(super) async fn list_available(
                pool: &$pool,
                limit: i64,
            ) -> Result<Vec<ListingSnapshot>> {
                let rows = sqlx::query(LIST_AVAILABLE_SQL)
                    .bind(ModerationStatus::Active.as_str())
                    .bind(limit)
                    .fetch_all(pool)
                    .await?;
                let mut listings = Vec::with_capacity(rows.len());
                for row in rows {
                    listings.push(snapshot_from_row!(&row));
                }
                Ok(listings)
            }

            pub(super) async fn active_listing_ids(pool: &$pool) -> Result<Vec<i64>> {
                let ids: Vec<i64> =
                    sqlx::query_scalar("SELECT id FROM listings WHERE status = ? ORDER BY id")
                        .bind(ModerationStatus::Active.as_str())
                        .fetch_all(pool)
                        .await?;
                Ok(ids)
            }

            pub(super) async fn count_manual(pool: &$pool) -> Result<i64> {
                let count: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM recommended_listings WHERE is_random = ?")
                        .bind(false)
                        .fetch_one(pool)
                        .await?;
                Ok(count)
            }

            pub(super) async fn append(
                pool: &$pool,
                listing_id: i64,
                now: DateTime<Utc>,
            ) -> Result<AppendOutcome> {
                let mut tx = pool.begin().await?;

                let inserted = sqlx::query(APPEND_SQL)
                    .bind(false)
                    .bind(now)
                    .bind(listing_id)
                    .bind(ModerationStatus::Active.as_str())
                    .execute(&mut *tx)
                    .await;
                let result = match inserted {
                    Ok(result) => result,
                    Err(e) if is_unique_violation(&e) => {
                        return Ok(AppendOutcome::AlreadyRecommended)
                    }
                    Err(e) => return Err(e).context("Failed to insert recommended listing"),
                };

                if result.rows_affected() == 0 {
                    let status: Option<String> =
                        sqlx::query_scalar("SELECT status FROM listings WHERE id = ?")
                            .bind(listing_id)
                            .fetch_optional(&mut *tx)
                            .await?;
                    return Ok(match status {
                        None => AppendOutcome::ListingNotFound,
                        Some(status) => match status.parse::<ModerationStatus>()? {
                            ModerationStatus::Active => AppendOutcome::AlreadyRecommended,
                            other => AppendOutcome::NotEligible(other),
                        },
                    });
                }

                let id = result.inserted_id();
                let position: i64 =
                    sqlx::query_scalar("SELECT position FROM recommended_listings WHERE id = ?")
                        .bind(id)
                        .fetch_one(&mut *tx)
                        .await?;
                drop_backup!(tx);

                tx.commit().await?;
                Ok(AppendOutcome::Added(RecommendedEntry {
                    id,
                    listing_id,
                    position,
                    is_random: false,
                    created_at: now,
                }))
            }

            pub(super) async fn remove(pool: &$pool, entry_id: i64) -> Result<bool> {
                let mut tx = pool.begin().await?;

                let affected = sqlx::query("DELETE FROM recommended_listings WHERE id = ?")
                    .bind(entry_id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                if affected == 0 {
                    return Ok(false);
                }
                drop_backup!(tx);

                tx.commit().await?;
                Ok(true)
            }

            pub(super) async fn reorder(pool: &$pool, entry_ids: &[i64]) -> Result<ReorderOutcome> {
                let mut tx = pool.begin().await?;

                // Opening write takes the database lock before anything is read;
                // every position is rewritten below or rolled back with `tx`
                sqlx::query("UPDATE recommended_listings SET position = -1 - position")
                    .execute(&mut *tx)
                    .await?;

                let current: Vec<i64> = sqlx::query_scalar("SELECT id FROM recommended_listings")
                    .fetch_all(&mut *tx)
                    .await?;
                let current: HashSet<i64> = current.into_iter().collect();

                if let Some(unknown) = entry_ids.iter().find(|id| !current.contains(id)) {
                    return Ok(ReorderOutcome::UnknownEntry(*unknown));
                }
                let requested: HashSet<i64> = entry_ids.iter().copied().collect();
                if requested.len() < current.len() {
                    return Ok(ReorderOutcome::MissingEntries(current.len() - requested.len()));
                }

                for (position, id) in entry_ids.iter().enumerate() {
                    sqlx::query("UPDATE recommended_listings SET position = ? WHERE id = ?")
                        .bind(position as i64)
                        .bind(*id)
                        .execute(&mut *tx)
                        .await?;
                }
                drop_backup!(tx);

                tx.commit().await?;
                Ok(ReorderOutcome::Applied)
            }

            pub(super) async fn replace_with_random(
                pool: &$pool,
                listing_ids: &[i64],
                now: DateTime<Utc>,
            ) -> Result<usize> {
                let mut tx = pool.begin().await?;

                sqlx::query("DELETE FROM recommended_backup")
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(BACKUP_CURRENT_SQL)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM recommended_listings")
                    .execute(&mut *tx)
                    .await?;

                // Listings may have left `active` since they were sampled
                let mut inserted = 0usize;
                for listing_id in listing_ids {
                    let affected = sqlx::query(
                        "INSERT INTO recommended_listings (listing_id, position, is_random, created_at)
                         SELECT id, ?, ?, ? FROM listings WHERE id = ? AND status = ?",
                    )
                    .bind(inserted as i64)
                    .bind(true)
                    .bind(now)
                    .bind(*listing_id)
                    .bind(ModerationStatus::Active.as_str())
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                    inserted += affected as usize;
                }

                sqlx::query($upsert)
                    .bind(RECOMMENDED_RANDOM_MODE)
                    .bind("true")
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query($upsert)
                    .bind(RECOMMENDED_BACKUP_AT)
                    .bind(now.to_rfc3339())
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
                Ok(inserted)
            }

            pub(super) async fn restore_backup(
                pool: &$pool,
                now: DateTime<Utc>,
            ) -> Result<Option<usize>> {
                let mut tx = pool.begin().await?;

                let marker = sqlx::query(DELETE_SETTING_SQL)
                    .bind(RECOMMENDED_BACKUP_AT)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                if marker == 0 {
                    return Ok(None);
                }

                sqlx::query("DELETE FROM recommended_listings")
                    .execute(&mut *tx)
                    .await?;
                let restored = sqlx::query(RESTORE_BACKUP_SQL)
                    .bind(ModerationStatus::Deleted.as_str())
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                sqlx::query("DELETE FROM recommended_backup")
                    .execute(&mut *tx)
                    .await?;
                sqlx::query($upsert)
                    .bind(RECOMMENDED_RANDOM_MODE)
                    .bind("false")
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
                Ok(Some(restored as usize))
            }

            pub(super) async fn disable_random(
                pool: &$pool,
                clear: bool,
                now: DateTime<Utc>,
            ) -> Result<u64> {
                let mut tx = pool.begin().await?;

                let removed = if clear {
                    sqlx::query("DELETE FROM recommended_listings WHERE is_random = ?")
                        .bind(true)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected()
                } else {
                    0
                };
                sqlx::query($upsert)
                    .bind(RECOMMENDED_RANDOM_MODE)
                    .bind("false")
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                drop_backup!(tx);

                tx.commit().await?;
                Ok(removed)
            }

            pub(super) async fn random_mode(pool: &$pool) -> Result<bool> {
                let value: Option<String> = sqlx::query_scalar(SETTING_VALUE_SQL)
                    .bind(RECOMMENDED_RANDOM_MODE)
                    .fetch_optional(pool)
                    .await?;
                Ok(value.as_deref() == Some("true"))
            }
        }
    };
}

recommended_queries!(sqlite, sqlx::SqlitePool, UPSERT_SQLITE);
recommended_queries!(mysql, sqlx::MySqlPool, UPSERT_MYSQL);

#[async_trait]
impl RecommendedRepository for SqlxRecommendedRepository {
    async fn list_with_listings(&self) -> Result<Vec<RecommendedListing>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::list_with_listings(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => mysql::list_with_listings(self.pool.mysql()?).await,
        }
    }

    async fn list_available(&self, limit: i64) -> Result<Vec<ListingSnapshot>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::list_available(self.pool.sqlite()?, limit).await,
            DatabaseDriver::Mysql => mysql::list_available(self.pool.mysql()?, limit).await,
        }
    }

    async fn active_listing_ids(&self) -> Result<Vec<i64>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::active_listing_ids(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => mysql::active_listing_ids(self.pool.mysql()?).await,
        }
    }

    async fn count_manual(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::count_manual(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => mysql::count_manual(self.pool.mysql()?).await,
        }
    }

    async fn append(&self, listing_id: i64, now: DateTime<Utc>) -> Result<AppendOutcome> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::append(self.pool.sqlite()?, listing_id, now).await,
            DatabaseDriver::Mysql => mysql::append(self.pool.mysql()?, listing_id, now).await,
        }
    }

    async fn remove(&self, entry_id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::remove(self.pool.sqlite()?, entry_id).await,
            DatabaseDriver::Mysql => mysql::remove(self.pool.mysql()?, entry_id).await,
        }
    }

    async fn reorder(&self, entry_ids: &[i64]) -> Result<ReorderOutcome> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::reorder(self.pool.sqlite()?, entry_ids).await,
            DatabaseDriver::Mysql => mysql::reorder(self.pool.mysql()?, entry_ids).await,
        }
    }

    async fn replace_with_random(&self, listing_ids: &[i64], now: DateTime<Utc>) -> Result<usize> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlite::replace_with_random(self.pool.sqlite()?, listing_ids, now).await
            }
            DatabaseDriver::Mysql => {
                mysql::replace_with_random(self.pool.mysql()?, listing_ids, now).await
            }
        }
    }

    async fn restore_backup(&self, now: DateTime<Utc>) -> Result<Option<usize>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::restore_backup(self.pool.sqlite()?, now).await,
            DatabaseDriver::Mysql => mysql::restore_backup(self.pool.mysql()?, now).await,
        }
    }

    async fn disable_random(&self, clear: bool, now: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::disable_random(self.pool.sqlite()?, clear, now).await,
            DatabaseDriver::Mysql => mysql::disable_random(self.pool.mysql()?, clear, now).await,
        }
    }

    async fn random_mode(&self) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::random_mode(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => mysql::random_mode(self.pool.mysql()?).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{EntityRepository, SqlxEntityRepository, StatusChange};
    use crate::db::{migrated_test_pool, seed_user};
    use crate::models::{EntityDetails, EntityKind, NewEntity};

    struct Fixture {
        entities: SqlxEntityRepository,
        repo: SqlxRecommendedRepository,
        user_id: i64,
    }

    async fn fixture() -> Fixture {
        let pool = migrated_test_pool().await;
        let user_id = seed_user(&pool, "seller@example.com").await;
        Fixture {
            entities: SqlxEntityRepository::new(pool.clone()),
            repo: SqlxRecommendedRepository::new(pool),
            user_id,
        }
    }

    impl Fixture {
        async fn listing(&self, status: ModerationStatus) -> i64 {
            let record = self
                .entities
                .create(
                    &NewEntity {
                        user_id: self.user_id,
                        details: EntityDetails::Listing(RealtyListingDetails {
                            price: 50_000,
                            rooms: Some(1),
                            area: 30.0,
                            floor: None,
                            building_floors: None,
                            description: None,
                        }),
                    },
                    Utc::now(),
                )
                .await
                .unwrap();
            if status != ModerationStatus::PendingModeration {
                let applied = self
                    .entities
                    .transition(&StatusChange {
                        kind: EntityKind::Listing,
                        id: record.id,
                        from: ModerationStatus::PendingModeration,
                        to: status,
                        rejection_reason: None,
                        expires_at: None,
                        at: Utc::now(),
                    })
                    .await
                    .unwrap()
                    .applied;
                assert!(applied);
            }
            record.id
        }
    }

    fn added(outcome: AppendOutcome) -> RecommendedEntry {
        match outcome {
            AppendOutcome::Added(entry) => entry,
            other => panic!("expected Added, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_append_checks_eligibility() {
        let f = fixture().await;
        let active = f.listing(ModerationStatus::Active).await;
        let pending = f.listing(ModerationStatus::PendingModeration).await;

        let first = added(f.repo.append(active, Utc::now()).await.unwrap());
        assert_eq!(first.position, 0);
        assert!(!first.is_random);

        assert_eq!(
            f.repo.append(active, Utc::now()).await.unwrap(),
            AppendOutcome::AlreadyRecommended
        );
        assert_eq!(
            f.repo.append(pending, Utc::now()).await.unwrap(),
            AppendOutcome::NotEligible(ModerationStatus::PendingModeration)
        );
        assert_eq!(
            f.repo.append(9999, Utc::now()).await.unwrap(),
            AppendOutcome::ListingNotFound
        );
    }

    #[tokio::test]
    async fn test_append_uses_max_position_plus_one() {
        let f = fixture().await;
        let a = f.listing(ModerationStatus::Active).await;
        let b = f.listing(ModerationStatus::Active).await;
        let c = f.listing(ModerationStatus::Active).await;

        let first = added(f.repo.append(a, Utc::now()).await.unwrap());
        let second = added(f.repo.append(b, Utc::now()).await.unwrap());
        assert!(f.repo.remove(first.id).await.unwrap());
        let third = added(f.repo.append(c, Utc::now()).await.unwrap());

        assert_eq!(second.position, 1);
        assert_eq!(third.position, 2);
        assert!(!f.repo.remove(first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_available_excludes_recommended_and_inactive() {
        let f = fixture().await;
        let recommended = f.listing(ModerationStatus::Active).await;
        let free = f.listing(ModerationStatus::Active).await;
        f.listing(ModerationStatus::Rejected).await;
        f.repo.append(recommended, Utc::now()).await.unwrap();

        let available = f.repo.list_available(50).await.unwrap();
        assert_eq!(available.iter().map(|l| l.id).collect::<Vec<_>>(), vec![free]);
    }

    #[tokio::test]
    async fn test_reorder_requires_permutation() {
        let f = fixture().await;
        let mut entries = Vec::new();
        for _ in 0..3 {
            let id = f.listing(ModerationStatus::Active).await;
            entries.push(added(f.repo.append(id, Utc::now()).await.unwrap()).id);
        }

        assert_eq!(
            f.repo.reorder(&[entries[0], entries[1]]).await.unwrap(),
            ReorderOutcome::MissingEntries(1)
        );
        assert_eq!(
            f.repo.reorder(&[entries[0], 4242, entries[2]]).await.unwrap(),
            ReorderOutcome::UnknownEntry(4242)
        );

        let reversed: Vec<i64> = entries.iter().rev().copied().collect();
        assert_eq!(f.repo.reorder(&reversed).await.unwrap(), ReorderOutcome::Applied);
        let listed: Vec<i64> = f
            .repo
            .list_with_listings()
            .await
            .unwrap()
            .iter()
            .map(|r| r.entry.id)
            .collect();
        assert_eq!(listed, reversed);
    }

    #[tokio::test]
    async fn test_random_replace_and_restore() {
        let f = fixture().await;
        let manual = f.listing(ModerationStatus::Active).await;
        let a = f.listing(ModerationStatus::Active).await;
        let b = f.listing(ModerationStatus::Active).await;
        let rejected = f.listing(ModerationStatus::Rejected).await;
        f.repo.append(manual, Utc::now()).await.unwrap();
        assert_eq!(f.repo.count_manual().await.unwrap(), 1);

        let inserted = f
            .repo
            .replace_with_random(&[a, rejected, b], Utc::now())
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert!(f.repo.random_mode().await.unwrap());
        let current = f.repo.list_with_listings().await.unwrap();
        assert!(current.iter().all(|r| r.entry.is_random));
        assert_eq!(
            current.iter().map(|r| r.entry.position).collect::<Vec<_>>(),
            vec![0, 1]
        );

        assert_eq!(f.repo.restore_backup(Utc::now()).await.unwrap(), Some(1));
        assert!(!f.repo.random_mode().await.unwrap());
        let restored = f.repo.list_with_listings().await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].entry.listing_id, manual);

        // The backup is single-use
        assert_eq!(f.repo.restore_backup(Utc::now()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejected_reorder_keeps_positions_and_backup() {
        let f = fixture().await;
        let manual = f.listing(ModerationStatus::Active).await;
        let a = f.listing(ModerationStatus::Active).await;
        let b = f.listing(ModerationStatus::Active).await;
        f.repo.append(manual, Utc::now()).await.unwrap();
        f.repo.replace_with_random(&[a, b], Utc::now()).await.unwrap();

        let ids: Vec<i64> = f
            .repo
            .list_with_listings()
            .await
            .unwrap()
            .iter()
            .map(|r| r.entry.id)
            .collect();
        assert_eq!(
            f.repo.reorder(&[ids[1], 4242]).await.unwrap(),
            ReorderOutcome::UnknownEntry(4242)
        );
        assert_eq!(
            f.repo.reorder(&[ids[1]]).await.unwrap(),
            ReorderOutcome::MissingEntries(1)
        );
        let positions: Vec<i64> = f
            .repo
            .list_with_listings()
            .await
            .unwrap()
            .iter()
            .map(|r| r.entry.position)
            .collect();
        assert_eq!(positions, vec![0, 1]);

        // Nothing was applied, so the draw can still be undone
        assert_eq!(f.repo.restore_backup(Utc::now()).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_append_after_draw_drops_backup() {
        let f = fixture().await;
        let manual = f.listing(ModerationStatus::Active).await;
        let drawn = f.listing(ModerationStatus::Active).await;
        let later = f.listing(ModerationStatus::Active).await;
        f.repo.append(manual, Utc::now()).await.unwrap();
        f.repo.replace_with_random(&[drawn], Utc::now()).await.unwrap();

        // A rejected append changes nothing and leaves the backup alone
        assert_eq!(
            f.repo.append(drawn, Utc::now()).await.unwrap(),
            AppendOutcome::AlreadyRecommended
        );
        added(f.repo.append(later, Utc::now()).await.unwrap());

        assert_eq!(f.repo.restore_backup(Utc::now()).await.unwrap(), None);
        let listings: Vec<i64> = f
            .repo
            .list_with_listings()
            .await
            .unwrap()
            .iter()
            .map(|r| r.entry.listing_id)
            .collect();
        assert_eq!(listings, vec![drawn, later]);
    }

    #[tokio::test]
    async fn test_disable_random_optionally_clears() {
        let f = fixture().await;
        let a = f.listing(ModerationStatus::Active).await;
        let b = f.listing(ModerationStatus::Active).await;

        f.repo.replace_with_random(&[a, b], Utc::now()).await.unwrap();
        assert_eq!(f.repo.disable_random(false, Utc::now()).await.unwrap(), 0);
        assert!(!f.repo.random_mode().await.unwrap());
        assert_eq!(f.repo.list_with_listings().await.unwrap().len(), 2);

        f.repo.replace_with_random(&[a], Utc::now()).await.unwrap();
        assert_eq!(f.repo.disable_random(true, Utc::now()).await.unwrap(), 1);
        assert!(f.repo.list_with_listings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_listing_drops_its_entry() {
        let f = fixture().await;
        let id = f.listing(ModerationStatus::Active).await;
        f.repo.append(id, Utc::now()).await.unwrap();

        let outcome = f
            .entities
            .transition(&StatusChange {
                kind: EntityKind::Listing,
                id,
                from: ModerationStatus::Active,
                to: ModerationStatus::Deleted,
                rejection_reason: None,
                expires_at: None,
                at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.removed_recommendations, 1);
        assert!(f.repo.list_with_listings().await.unwrap().is_empty());
    }
}
