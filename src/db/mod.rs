//! Database layer
//!
//! Supports SQLite (default, single-file deployment) and MySQL. The driver is
//! selected from configuration and hidden behind [`DatabasePool`].
//!
//! ```ignore
//! use matchdesk::config::DatabaseConfig;
//! use matchdesk::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};

/// Whether a sqlx error is a unique constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// In-memory pool with every migration applied
#[cfg(test)]
pub(crate) async fn migrated_test_pool() -> DynDatabasePool {
    let pool = create_test_pool().await.expect("create test pool");
    migrations::run_migrations(&pool)
        .await
        .expect("run migrations");
    pool
}

/// File-backed pool with the production connection limits and every migration applied
#[cfg(test)]
pub(crate) async fn migrated_file_pool(path: &std::path::Path) -> DynDatabasePool {
    let config = crate::config::DatabaseConfig {
        driver: crate::config::DatabaseDriver::Sqlite,
        url: path.to_string_lossy().to_string(),
    };
    let pool = create_pool(&config).await.expect("create file pool");
    migrations::run_migrations(&pool)
        .await
        .expect("run migrations");
    pool
}

/// Insert a free-tier user and return its id
#[cfg(test)]
pub(crate) async fn seed_user(pool: &DynDatabasePool, email: &str) -> i64 {
    let now = chrono::Utc::now();
    sqlx::query("INSERT INTO users (email, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(email)
        .bind(email.split('@').next().unwrap_or(email))
        .bind(now)
        .bind(now)
        .execute(pool.sqlite().expect("sqlite pool"))
        .await
        .expect("insert user")
        .last_insert_rowid()
}
