//! User repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

use super::InsertId;
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{
    BlockFilter, CreateUserInput, ListParams, ModerationStatus, User, UserLimits, UserSummary,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, input: &CreateUserInput, now: DateTime<Utc>) -> Result<User>;
    async fn get(&self, id: i64) -> Result<Option<User>>;
    /// Newest first, with usage counters
    async fn list(&self, filter: BlockFilter, params: &ListParams) -> Result<Vec<UserSummary>>;
    async fn count(&self, filter: BlockFilter) -> Result<i64>;
    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<i64>;
    /// Flip the block flag if it currently holds the opposite value.
    /// Returns false when the user was already in the requested state or does not exist.
    async fn set_blocked(
        &self,
        id: i64,
        blocked: bool,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    async fn set_limits(&self, id: i64, limits: &UserLimits, now: DateTime<Utc>) -> Result<bool>;
}

pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

const USER_COLUMNS: &str = "u.id, u.email, u.name, u.subscription, u.is_blocked, u.blocked_reason, \
     u.listings_limit, u.requirements_limit, u.created_at, u.updated_at";

// Counters skip deleted rows; `?` is bound to 'deleted' four times.
const SUMMARY_COUNTERS: &str = "\
    (SELECT COUNT(*) FROM listings WHERE user_id = u.id AND status <> ?) + \
    (SELECT COUNT(*) FROM auto_listings WHERE user_id = u.id AND status <> ?) AS listing_count, \
    (SELECT COUNT(*) FROM requirements WHERE user_id = u.id AND status <> ?) + \
    (SELECT COUNT(*) FROM auto_requirements WHERE user_id = u.id AND status <> ?) AS requirement_count";

// `(? IS NULL OR u.is_blocked = ?)` with the same optional flag bound twice
const BLOCK_FILTER_CLAUSE: &str = "(? IS NULL OR u.is_blocked = ?)";

fn block_flag(filter: BlockFilter) -> Option<bool> {
    match filter {
        BlockFilter::Any => None,
        BlockFilter::Blocked => Some(true),
        BlockFilter::NotBlocked => Some(false),
    }
}

macro_rules! user_from_row {
    ($row:expr) => {{
        let row = $row;
        User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            subscription: row.try_get::<String, _>("subscription")?.parse()?,
            is_blocked: row.try_get("is_blocked")?,
            blocked_reason: row.try_get("blocked_reason")?,
            listings_limit: row.try_get("listings_limit")?,
            requirements_limit: row.try_get("requirements_limit")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }
    }};
}

macro_rules! user_queries {
    ($driver:ident, $pool:ty) => {
        mod $driver {
            use super::*;

            pub(super) async fn create(
                pool: &$pool,
                input: &CreateUserInput,
                now: DateTime<Utc>,
            ) -> Result<i64> {
                let result = sqlx::query(
                    "INSERT INTO users (email, name, subscription, is_blocked, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(input.email.trim())
                .bind(input.name.trim())
                .bind(input.subscription.as_str())
                .bind(false)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await
                .context("Failed to insert user")?;
                Ok(result.inserted_id())
            }

            pub(super) async fn get(pool: &$pool, id: i64) -> Result<Option<User>> {
                let sql = format!("SELECT {} FROM users u WHERE u.id = ?", USER_COLUMNS);
                let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
                match row {
                    Some(row) => Ok(Some(user_from_row!(row))),
                    None => Ok(None),
                }
            }

            pub(super) async fn list(
                pool: &$pool,
                filter: BlockFilter,
                params: &ListParams,
            ) -> Result<Vec<UserSummary>> {
                let sql = format!(
                    "SELECT {}, {} FROM users u WHERE {} \
                     ORDER BY u.created_at DESC, u.id DESC LIMIT ? OFFSET ?",
                    USER_COLUMNS, SUMMARY_COUNTERS, BLOCK_FILTER_CLAUSE
                );
                let deleted = ModerationStatus::Deleted.as_str();
                let flag = block_flag(filter);
                let rows = sqlx::query(&sql)
                    .bind(deleted)
                    .bind(deleted)
                    .bind(deleted)
                    .bind(deleted)
                    .bind(flag)
                    .bind(flag)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await?;

                let mut users = Vec::with_capacity(rows.len());
                for row in rows {
                    users.push(UserSummary {
                        user: user_from_row!(&row),
                        listing_count: row.try_get("listing_count")?,
                        requirement_count: row.try_get("requirement_count")?,
                    });
                }
                Ok(users)
            }

            pub(super) async fn count(pool: &$pool, filter: BlockFilter) -> Result<i64> {
                let sql = format!("SELECT COUNT(*) FROM users u WHERE {}", BLOCK_FILTER_CLAUSE);
                let flag = block_flag(filter);
                let count: i64 = sqlx::query_scalar(&sql)
                    .bind(flag)
                    .bind(flag)
                    .fetch_one(pool)
                    .await?;
                Ok(count)
            }

            pub(super) async fn count_created_since(
                pool: &$pool,
                since: DateTime<Utc>,
            ) -> Result<i64> {
                let count: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE created_at >= ?")
                        .bind(since)
                        .fetch_one(pool)
                        .await?;
                Ok(count)
            }

            pub(super) async fn set_blocked(
                pool: &$pool,
                id: i64,
                blocked: bool,
                reason: Option<&str>,
                now: DateTime<Utc>,
            ) -> Result<bool> {
                let affected = sqlx::query(
                    "UPDATE users SET is_blocked = ?, blocked_reason = ?, updated_at = ?
                     WHERE id = ? AND is_blocked = ?",
                )
                .bind(blocked)
                .bind(reason)
                .bind(now)
                .bind(id)
                .bind(!blocked)
                .execute(pool)
                .await?
                .rows_affected();
                Ok(affected > 0)
            }

            pub(super) async fn set_limits(
                pool: &$pool,
                id: i64,
                limits: &UserLimits,
                now: DateTime<Utc>,
            ) -> Result<bool> {
                let affected = sqlx::query(
                    "UPDATE users SET listings_limit = ?, requirements_limit = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(limits.listings_limit)
                .bind(limits.requirements_limit)
                .bind(now)
                .bind(id)
                .execute(pool)
                .await?
                .rows_affected();
                Ok(affected > 0)
            }
        }
    };
}

user_queries!(sqlite, sqlx::SqlitePool);
user_queries!(mysql, sqlx::MySqlPool);

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, input: &CreateUserInput, now: DateTime<Utc>) -> Result<User> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::create(self.pool.sqlite()?, input, now).await?,
            DatabaseDriver::Mysql => mysql::create(self.pool.mysql()?, input, now).await?,
        };
        self.get(id)
            .await?
            .with_context(|| format!("user {} missing after insert", id))
    }

    async fn get(&self, id: i64) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::get(self.pool.sqlite()?, id).await,
            DatabaseDriver::Mysql => mysql::get(self.pool.mysql()?, id).await,
        }
    }

    async fn list(&self, filter: BlockFilter, params: &ListParams) -> Result<Vec<UserSummary>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::list(self.pool.sqlite()?, filter, params).await,
            DatabaseDriver::Mysql => mysql::list(self.pool.mysql()?, filter, params).await,
        }
    }

    async fn count(&self, filter: BlockFilter) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::count(self.pool.sqlite()?, filter).await,
            DatabaseDriver::Mysql => mysql::count(self.pool.mysql()?, filter).await,
        }
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlite::count_created_since(self.pool.sqlite()?, since).await,
            DatabaseDriver::Mysql => mysql::count_created_since(self.pool.mysql()?, since).await,
        }
    }

    async fn set_blocked(
        &self,
        id: i64,
        blocked: bool,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlite::set_blocked(self.pool.sqlite()?, id, blocked, reason, now).await
            }
            DatabaseDriver::Mysql => {
                mysql::set_blocked(self.pool.mysql()?, id, blocked, reason, now).await
            }
        }
    }

    async fn set_limits(&self, id: i64, limits: &UserLimits, now: DateTime<Utc>) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlite::set_limits(self.pool.sqlite()?, id, limits, now).await
            }
            DatabaseDriver::Mysql => mysql::set_limits(self.pool.mysql()?, id, limits, now).await,
        }
    }
}
