//! Settings repository
//!
//! Process-wide key/value settings: free-tier limits and the recommended
//! feed's random-mode flag.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;

pub const FREE_LISTINGS_PER_MONTH: &str = "free_listings_per_month";
pub const FREE_REQUIREMENTS_PER_MONTH: &str = "free_requirements_per_month";
pub const RECOMMENDED_RANDOM_MODE: &str = "recommended_random_mode";
pub const RECOMMENDED_BACKUP_AT: &str = "recommended_backup_at";

pub(crate) const UPSERT_SQLITE: &str = "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

pub(crate) const UPSERT_MYSQL: &str = "INSERT INTO settings (`key`, value, updated_at) VALUES (?, ?, ?)
     ON DUPLICATE KEY UPDATE value = VALUES(value), updated_at = VALUES(updated_at)";

/// A setting key-value pair
#[derive(Debug, Clone)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Get a single setting by key
    async fn get(&self, key: &str) -> Result<Option<Setting>>;

    /// Get the values of the given keys that are set
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>>;

    /// Set a single setting
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set several settings in one transaction
    async fn set_many(&self, settings: &[(&str, String)]) -> Result<()>;
}

pub struct SqlxSettingsRepository {
    pool: DynDatabasePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SettingsRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<Setting>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_sqlite(self.pool.sqlite()?, key).await,
            DatabaseDriver::Mysql => get_mysql(self.pool.mysql()?, key).await,
        }
    }

    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let mut result = HashMap::new();
        for key in keys {
            if let Some(setting) = self.get(key).await? {
                result.insert(setting.key, setting.value);
            }
        }
        Ok(result)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value.to_string())]).await
    }

    async fn set_many(&self, settings: &[(&str, String)]) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => set_many_sqlite(self.pool.sqlite()?, settings).await,
            DatabaseDriver::Mysql => set_many_mysql(self.pool.mysql()?, settings).await,
        }
    }
}

// SQLite implementations
async fn get_sqlite(pool: &SqlitePool, key: &str) -> Result<Option<Setting>> {
    let row = sqlx::query("SELECT key, value, updated_at FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    row.map(|r| -> Result<Setting> {
        Ok(Setting {
            key: r.try_get("key")?,
            value: r.try_get("value")?,
            updated_at: r.try_get("updated_at")?,
        })
    })
    .transpose()
}

async fn set_many_sqlite(pool: &SqlitePool, settings: &[(&str, String)]) -> Result<()> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    for (key, value) in settings {
        sqlx::query(UPSERT_SQLITE)
            .bind(*key)
            .bind(value.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

// MySQL implementations
async fn get_mysql(pool: &MySqlPool, key: &str) -> Result<Option<Setting>> {
    let row = sqlx::query("SELECT `key`, value, updated_at FROM settings WHERE `key` = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    row.map(|r| -> Result<Setting> {
        Ok(Setting {
            key: r.try_get("key")?,
            value: r.try_get("value")?,
            updated_at: r.try_get("updated_at")?,
        })
    })
    .transpose()
}

async fn set_many_mysql(pool: &MySqlPool, settings: &[(&str, String)]) -> Result<()> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    for (key, value) in settings {
        sqlx::query(UPSERT_MYSQL)
            .bind(*key)
            .bind(value.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
