//! Marketplace user accounts as seen by operators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Subscription {
    #[default]
    Free,
    Premium,
    AgencyBasic,
    AgencyPro,
}

impl Subscription {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::AgencyBasic => "agency_basic",
            Self::AgencyPro => "agency_pro",
        }
    }

    /// Only the free tier is subject to monthly publication limits
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Free)
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subscription {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            "agency_basic" => Ok(Self::AgencyBasic),
            "agency_pro" => Ok(Self::AgencyPro),
            _ => Err(anyhow::anyhow!("Invalid subscription: {}", s)),
        }
    }
}

/// User account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub subscription: Subscription,
    pub is_blocked: bool,
    pub blocked_reason: Option<String>,
    /// Per-user override of the monthly listing limit. `None` uses the
    /// platform setting, `Some(0)` means unlimited.
    pub listings_limit: Option<i64>,
    /// Per-user override of the monthly requirement limit
    pub requirements_limit: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User with usage counters derived at read time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: User,
    /// Non-deleted listings across both domains
    pub listing_count: i64,
    /// Non-deleted requirements across both domains
    pub requirement_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub subscription: Subscription,
}

/// Per-user limit overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserLimits {
    #[serde(default)]
    pub listings_limit: Option<i64>,
    #[serde(default)]
    pub requirements_limit: Option<i64>,
}

/// Filter for user listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockFilter {
    #[default]
    Any,
    Blocked,
    NotBlocked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_roundtrip() {
        for sub in [
            Subscription::Free,
            Subscription::Premium,
            Subscription::AgencyBasic,
            Subscription::AgencyPro,
        ] {
            assert_eq!(sub.as_str().parse::<Subscription>().unwrap(), sub);
        }
        assert!("gold".parse::<Subscription>().is_err());
        assert!(Subscription::Free.is_limited());
        assert!(!Subscription::AgencyPro.is_limited());
    }

    #[test]
    fn test_summary_serializes_flat() {
        let now = Utc::now();
        let summary = UserSummary {
            user: User {
                id: 1,
                email: "a@example.com".to_string(),
                name: "A".to_string(),
                subscription: Subscription::Premium,
                is_blocked: false,
                blocked_reason: None,
                listings_limit: None,
                requirements_limit: Some(0),
                created_at: now,
                updated_at: now,
            },
            listing_count: 2,
            requirement_count: 0,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["subscription"], "premium");
        assert_eq!(json["listing_count"], 2);
        assert_eq!(json["email"], "a@example.com");
    }
}
