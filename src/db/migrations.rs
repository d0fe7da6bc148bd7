//! Database migrations
//!
//! Migrations are embedded in the binary as SQL strings with one variant per
//! backend. Applied versions are tracked in the `_migrations` table.
//!
//! ```ignore
//! use matchdesk::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```
//!
//! Timestamp columns carry no SQL default: rows are always written with
//! timestamps bound from the application so comparisons stay consistent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL,
                subscription VARCHAR(20) NOT NULL DEFAULT 'free'
                    CHECK (subscription IN ('free', 'premium', 'agency_basic', 'agency_pro')),
                is_blocked BOOLEAN NOT NULL DEFAULT 0,
                blocked_reason TEXT,
                listings_limit INTEGER,
                requirements_limit INTEGER,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_created_at ON users(created_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL,
                subscription VARCHAR(20) NOT NULL DEFAULT 'free',
                is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
                blocked_reason TEXT,
                listings_limit BIGINT,
                requirements_limit BIGINT,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                CONSTRAINT chk_users_subscription
                    CHECK (subscription IN ('free', 'premium', 'agency_basic', 'agency_pro'))
            );
            CREATE INDEX idx_users_created_at ON users(created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "create_settings",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS settings (
                key VARCHAR(100) PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS settings (
                `key` VARCHAR(100) PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME(6) NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        name: "create_realty_entities",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                status VARCHAR(30) NOT NULL DEFAULT 'pending_moderation'
                    CHECK (status IN ('pending_moderation', 'active', 'rejected', 'inactive', 'expired', 'deleted')),
                rejection_reason TEXT,
                expires_at TIMESTAMP,
                price INTEGER NOT NULL,
                rooms INTEGER,
                area REAL NOT NULL,
                floor INTEGER,
                building_floors INTEGER,
                description TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_listings_status ON listings(status);
            CREATE INDEX IF NOT EXISTS idx_listings_user_id ON listings(user_id);
            CREATE INDEX IF NOT EXISTS idx_listings_created_at ON listings(created_at);

            CREATE TABLE IF NOT EXISTS requirements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                status VARCHAR(30) NOT NULL DEFAULT 'pending_moderation'
                    CHECK (status IN ('pending_moderation', 'active', 'rejected', 'inactive', 'expired', 'deleted')),
                rejection_reason TEXT,
                expires_at TIMESTAMP,
                deal_type VARCHAR(10) NOT NULL CHECK (deal_type IN ('sale', 'rent')),
                price_min INTEGER,
                price_max INTEGER,
                rooms_min INTEGER,
                rooms_max INTEGER,
                area_min REAL,
                area_max REAL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_requirements_status ON requirements(status);
            CREATE INDEX IF NOT EXISTS idx_requirements_user_id ON requirements(user_id);
            CREATE INDEX IF NOT EXISTS idx_requirements_created_at ON requirements(created_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS listings (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL,
                status VARCHAR(30) NOT NULL DEFAULT 'pending_moderation',
                rejection_reason TEXT,
                expires_at DATETIME(6),
                price BIGINT NOT NULL,
                rooms BIGINT,
                area DOUBLE NOT NULL,
                floor BIGINT,
                building_floors BIGINT,
                description TEXT,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                CONSTRAINT chk_listings_status
                    CHECK (status IN ('pending_moderation', 'active', 'rejected', 'inactive', 'expired', 'deleted'))
            );
            CREATE INDEX idx_listings_status ON listings(status);
            CREATE INDEX idx_listings_created_at ON listings(created_at);

            CREATE TABLE IF NOT EXISTS requirements (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL,
                status VARCHAR(30) NOT NULL DEFAULT 'pending_moderation',
                rejection_reason TEXT,
                expires_at DATETIME(6),
                deal_type VARCHAR(10) NOT NULL,
                price_min BIGINT,
                price_max BIGINT,
                rooms_min BIGINT,
                rooms_max BIGINT,
                area_min DOUBLE,
                area_max DOUBLE,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                CONSTRAINT chk_requirements_status
                    CHECK (status IN ('pending_moderation', 'active', 'rejected', 'inactive', 'expired', 'deleted'))
            );
            CREATE INDEX idx_requirements_status ON requirements(status);
            CREATE INDEX idx_requirements_created_at ON requirements(created_at);
        "#,
    },
    Migration {
        version: 4,
        name: "create_auto_entities",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS auto_listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                status VARCHAR(30) NOT NULL DEFAULT 'pending_moderation'
                    CHECK (status IN ('pending_moderation', 'active', 'rejected', 'inactive', 'expired', 'deleted')),
                rejection_reason TEXT,
                expires_at TIMESTAMP,
                deal_type VARCHAR(10) NOT NULL CHECK (deal_type IN ('sale', 'rent')),
                brand VARCHAR(100) NOT NULL,
                model VARCHAR(100) NOT NULL,
                year INTEGER NOT NULL,
                mileage INTEGER,
                price INTEGER NOT NULL,
                city VARCHAR(100) NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_auto_listings_status ON auto_listings(status);
            CREATE INDEX IF NOT EXISTS idx_auto_listings_user_id ON auto_listings(user_id);
            CREATE INDEX IF NOT EXISTS idx_auto_listings_created_at ON auto_listings(created_at);

            CREATE TABLE IF NOT EXISTS auto_requirements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                status VARCHAR(30) NOT NULL DEFAULT 'pending_moderation'
                    CHECK (status IN ('pending_moderation', 'active', 'rejected', 'inactive', 'expired', 'deleted')),
                rejection_reason TEXT,
                expires_at TIMESTAMP,
                deal_type VARCHAR(10) NOT NULL CHECK (deal_type IN ('sale', 'rent')),
                brands TEXT NOT NULL,
                year_min INTEGER,
                year_max INTEGER,
                price_min INTEGER,
                price_max INTEGER,
                mileage_max INTEGER,
                city VARCHAR(100),
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_auto_requirements_status ON auto_requirements(status);
            CREATE INDEX IF NOT EXISTS idx_auto_requirements_user_id ON auto_requirements(user_id);
            CREATE INDEX IF NOT EXISTS idx_auto_requirements_created_at ON auto_requirements(created_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS auto_listings (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL,
                status VARCHAR(30) NOT NULL DEFAULT 'pending_moderation',
                rejection_reason TEXT,
                expires_at DATETIME(6),
                deal_type VARCHAR(10) NOT NULL,
                brand VARCHAR(100) NOT NULL,
                model VARCHAR(100) NOT NULL,
                year BIGINT NOT NULL,
                mileage BIGINT,
                price BIGINT NOT NULL,
                city VARCHAR(100) NOT NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                CONSTRAINT chk_auto_listings_status
                    CHECK (status IN ('pending_moderation', 'active', 'rejected', 'inactive', 'expired', 'deleted'))
            );
            CREATE INDEX idx_auto_listings_status ON auto_listings(status);
            CREATE INDEX idx_auto_listings_created_at ON auto_listings(created_at);

            CREATE TABLE IF NOT EXISTS auto_requirements (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL,
                status VARCHAR(30) NOT NULL DEFAULT 'pending_moderation',
                rejection_reason TEXT,
                expires_at DATETIME(6),
                deal_type VARCHAR(10) NOT NULL,
                brands TEXT NOT NULL,
                year_min BIGINT,
                year_max BIGINT,
                price_min BIGINT,
                price_max BIGINT,
                mileage_max BIGINT,
                city VARCHAR(100),
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                CONSTRAINT chk_auto_requirements_status
                    CHECK (status IN ('pending_moderation', 'active', 'rejected', 'inactive', 'expired', 'deleted'))
            );
            CREATE INDEX idx_auto_requirements_status ON auto_requirements(status);
            CREATE INDEX idx_auto_requirements_created_at ON auto_requirements(created_at);
        "#,
    },
    Migration {
        version: 5,
        name: "create_recommended_listings",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS recommended_listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id INTEGER NOT NULL UNIQUE,
                position INTEGER NOT NULL,
                is_random BOOLEAN NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (listing_id) REFERENCES listings(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_recommended_position ON recommended_listings(position);

            CREATE TABLE IF NOT EXISTS recommended_backup (
                listing_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                is_random BOOLEAN NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                backed_up_at TIMESTAMP NOT NULL,
                FOREIGN KEY (listing_id) REFERENCES listings(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS recommended_listings (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                listing_id BIGINT NOT NULL UNIQUE,
                position BIGINT NOT NULL,
                is_random BOOLEAN NOT NULL DEFAULT FALSE,
                created_at DATETIME(6) NOT NULL,
                FOREIGN KEY (listing_id) REFERENCES listings(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_recommended_position ON recommended_listings(position);

            CREATE TABLE IF NOT EXISTS recommended_backup (
                listing_id BIGINT NOT NULL,
                position BIGINT NOT NULL,
                is_random BOOLEAN NOT NULL DEFAULT FALSE,
                created_at DATETIME(6) NOT NULL,
                backed_up_at DATETIME(6) NOT NULL,
                FOREIGN KEY (listing_id) REFERENCES listings(id) ON DELETE CASCADE
            );
        "#,
    },
];

/// Run all pending migrations.
///
/// Returns the number of migrations applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i64> = applied.iter().map(|m| m.version).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&(migration.version as i64)) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at DATETIME(6) NOT NULL
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => get_applied_migrations_sqlite(pool.sqlite()?).await,
        DatabaseDriver::Mysql => get_applied_migrations_mysql(pool.mysql()?).await,
    }
}

macro_rules! migration_record_from_row {
    ($row:expr) => {
        MigrationRecord {
            version: $row.try_get("version")?,
            name: $row.try_get("name")?,
            applied_at: $row.try_get("applied_at")?,
        }
    };
}

async fn get_applied_migrations_sqlite(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(migration_record_from_row!(row));
    }
    Ok(records)
}

async fn get_applied_migrations_mysql(pool: &MySqlPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(migration_record_from_row!(row));
    }
    Ok(records)
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.driver() {
        DatabaseDriver::Sqlite => apply_migration_sqlite(pool.sqlite()?, migration).await,
        DatabaseDriver::Mysql => apply_migration_mysql(pool.mysql()?, migration).await,
    }
}

async fn apply_migration_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;
    for statement in split_sql_statements(migration.up_sqlite) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES (?, ?, ?)")
        .bind(migration.version as i64)
        .bind(migration.name)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

// MySQL commits DDL implicitly, so statements run one by one on the pool.
async fn apply_migration_mysql(pool: &MySqlPool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_mysql) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES (?, ?, ?)")
        .bind(migration.version as i64)
        .bind(migration.name)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(())
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, skipping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty() || trimmed.starts_with("--")
    })
}
