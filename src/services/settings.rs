//! Settings service
//!
//! Platform-wide settings operators can change at runtime. Values missing
//! from the settings table fall back to the configured limits.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::LimitsConfig;
use crate::db::repositories::settings::{
    FREE_LISTINGS_PER_MONTH, FREE_REQUIREMENTS_PER_MONTH, RECOMMENDED_RANDOM_MODE,
};
use crate::db::repositories::SettingsRepository;

/// Settings as shown in the console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSettings {
    /// Monthly listing limit for free users, 0 = unlimited
    pub free_listings_per_month: i64,
    /// Monthly requirement limit for free users, 0 = unlimited
    pub free_requirements_per_month: i64,
    /// Read-only here; toggled through the recommended feed
    pub recommended_random_mode: bool,
}

/// Partial update; absent fields keep their value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub free_listings_per_month: Option<i64>,
    #[serde(default)]
    pub free_requirements_per_month: Option<i64>,
}

#[derive(Debug, Error)]
pub enum SettingsServiceError {
    #[error("Invalid setting value: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
    defaults: LimitsConfig,
}

impl SettingsService {
    pub fn new(repo: Arc<dyn SettingsRepository>, defaults: LimitsConfig) -> Self {
        Self { repo, defaults }
    }

    pub async fn get_platform_settings(&self) -> Result<PlatformSettings, SettingsServiceError> {
        let stored = self
            .repo
            .get_many(&[
                FREE_LISTINGS_PER_MONTH,
                FREE_REQUIREMENTS_PER_MONTH,
                RECOMMENDED_RANDOM_MODE,
            ])
            .await?;

        let limit = |key: &str, fallback: i64| match stored.get(key) {
            Some(raw) => match raw.parse::<i64>() {
                Ok(value) if value >= 0 => value,
                _ => {
                    warn!(key, value = %raw, "ignoring invalid stored limit");
                    fallback
                }
            },
            None => fallback,
        };

        Ok(PlatformSettings {
            free_listings_per_month: limit(
                FREE_LISTINGS_PER_MONTH,
                self.defaults.free_listings_per_month,
            ),
            free_requirements_per_month: limit(
                FREE_REQUIREMENTS_PER_MONTH,
                self.defaults.free_requirements_per_month,
            ),
            recommended_random_mode: stored
                .get(RECOMMENDED_RANDOM_MODE)
                .map(|v| v == "true")
                .unwrap_or(false),
        })
    }

    pub async fn update(
        &self,
        update: &SettingsUpdate,
    ) -> Result<PlatformSettings, SettingsServiceError> {
        let mut changes = Vec::new();
        for (key, value) in [
            (FREE_LISTINGS_PER_MONTH, update.free_listings_per_month),
            (FREE_REQUIREMENTS_PER_MONTH, update.free_requirements_per_month),
        ] {
            if let Some(value) = value {
                if value < 0 {
                    return Err(SettingsServiceError::ValidationError(format!(
                        "{} must not be negative",
                        key
                    )));
                }
                changes.push((key, value.to_string()));
            }
        }

        if !changes.is_empty() {
            self.repo.set_many(&changes).await?;
            info!(changed = changes.len(), "platform settings updated");
        }
        self.get_platform_settings().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrated_test_pool;
    use crate::db::repositories::SqlxSettingsRepository;

    async fn service() -> SettingsService {
        let pool = migrated_test_pool().await;
        SettingsService::new(SqlxSettingsRepository::boxed(pool), LimitsConfig::default())
    }

    #[tokio::test]
    async fn test_defaults_come_from_config() {
        let settings = service().await.get_platform_settings().await.unwrap();
        assert_eq!(settings.free_listings_per_month, 1);
        assert_eq!(settings.free_requirements_per_month, 5);
        assert!(!settings.recommended_random_mode);
    }

    #[tokio::test]
    async fn test_partial_update() {
        let service = service().await;
        let updated = service
            .update(&SettingsUpdate {
                free_listings_per_month: Some(0),
                free_requirements_per_month: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.free_listings_per_month, 0);
        assert_eq!(updated.free_requirements_per_month, 5);
    }

    #[tokio::test]
    async fn test_negative_rejected_without_partial_write() {
        let service = service().await;
        let result = service
            .update(&SettingsUpdate {
                free_listings_per_month: Some(3),
                free_requirements_per_month: Some(-1),
            })
            .await;
        assert!(matches!(result, Err(SettingsServiceError::ValidationError(_))));

        let settings = service.get_platform_settings().await.unwrap();
        assert_eq!(settings.free_listings_per_month, 1);
    }

    #[tokio::test]
    async fn test_corrupt_stored_value_falls_back() {
        let pool = migrated_test_pool().await;
        let repo = SqlxSettingsRepository::boxed(pool);
        repo.set(FREE_REQUIREMENTS_PER_MONTH, "lots").await.unwrap();
        repo.set(RECOMMENDED_RANDOM_MODE, "true").await.unwrap();

        let service = SettingsService::new(repo, LimitsConfig::default());
        let settings = service.get_platform_settings().await.unwrap();
        assert_eq!(settings.free_requirements_per_month, 5);
        assert!(settings.recommended_random_mode);
    }
}
