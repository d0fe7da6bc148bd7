//! Database repositories
//!
//! Each repository owns the SQL for one concern and dispatches on the
//! configured driver.

pub mod entity;
pub mod recommended;
pub mod settings;
pub mod user;

pub use entity::{EntityRepository, SqlxEntityRepository, StatusChange, TransitionOutcome};
pub use recommended::{
    AppendOutcome, RecommendedRepository, ReorderOutcome, SqlxRecommendedRepository,
};
pub use settings::{Setting, SettingsRepository, SqlxSettingsRepository};
pub use user::{SqlxUserRepository, UserRepository};

/// Id of the row created by an INSERT, for either driver
pub(crate) trait InsertId {
    fn inserted_id(&self) -> i64;
}

impl InsertId for sqlx::sqlite::SqliteQueryResult {
    fn inserted_id(&self) -> i64 {
        self.last_insert_rowid()
    }
}

impl InsertId for sqlx::mysql::MySqlQueryResult {
    fn inserted_id(&self) -> i64 {
        self.last_insert_id() as i64
    }
}
