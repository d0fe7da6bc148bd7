//! Recommended listings feed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::RealtyListingDetails;
use super::moderation::ModerationStatus;

/// A stored entry of the recommended set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedEntry {
    pub id: i64,
    pub listing_id: i64,
    /// Storage order key; may have gaps
    pub position: i64,
    pub is_random: bool,
    pub created_at: DateTime<Utc>,
}

/// The listing fields shown next to a recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSnapshot {
    pub id: i64,
    pub user_id: i64,
    pub status: ModerationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: RealtyListingDetails,
}

/// An entry joined with its listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedListing {
    pub entry: RecommendedEntry,
    pub listing: ListingSnapshot,
}

impl RecommendedListing {
    /// The listing left `active` after it was recommended
    pub fn is_stale(&self) -> bool {
        self.listing.status != ModerationStatus::Active
    }
}

/// One row of the recommended feed as presented to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    /// Entry id, used for removal and reordering
    pub id: i64,
    /// Dense display position starting at 0
    pub position: usize,
    pub is_random: bool,
    /// Set in the admin view for listings no longer active
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub listing: ListingSnapshot,
}

/// Result of toggling random mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomModeOutcome {
    pub enabled: bool,
    /// Entries currently in the set after the change
    pub items: Vec<RecommendedItem>,
}
