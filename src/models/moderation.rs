//! Moderation status pipeline shared by listings and requirements
//!
//! The four entity kinds (realty and auto, seller and buyer side) all follow
//! the same state machine. [`check_transition`] is the single source of truth
//! for which status changes are legal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Moderation status of a listing or requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    PendingModeration,
    Active,
    Rejected,
    Inactive,
    Expired,
    Deleted,
}

impl ModerationStatus {
    pub const ALL: [ModerationStatus; 6] = [
        Self::PendingModeration,
        Self::Active,
        Self::Rejected,
        Self::Inactive,
        Self::Expired,
        Self::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingModeration => "pending_moderation",
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
        }
    }

    /// `deleted` admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending_moderation" | "pending" => Ok(Self::PendingModeration),
            "active" => Ok(Self::Active),
            "rejected" => Ok(Self::Rejected),
            "inactive" => Ok(Self::Inactive),
            "expired" => Ok(Self::Expired),
            "deleted" => Ok(Self::Deleted),
            _ => Err(anyhow::anyhow!("Invalid moderation status: {}", s)),
        }
    }
}

/// Marketplace domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Realty,
    Auto,
}

/// Which side of the market an entity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sellers publish listings
    Seller,
    /// Buyers publish requirements
    Buyer,
}

/// The four moderated entity kinds, one per domain and role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Listing,
    Requirement,
    AutoListing,
    AutoRequirement,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        Self::Listing,
        Self::Requirement,
        Self::AutoListing,
        Self::AutoRequirement,
    ];

    pub fn new(domain: Domain, role: Role) -> Self {
        match (domain, role) {
            (Domain::Realty, Role::Seller) => Self::Listing,
            (Domain::Realty, Role::Buyer) => Self::Requirement,
            (Domain::Auto, Role::Seller) => Self::AutoListing,
            (Domain::Auto, Role::Buyer) => Self::AutoRequirement,
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            Self::Listing | Self::Requirement => Domain::Realty,
            Self::AutoListing | Self::AutoRequirement => Domain::Auto,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Listing | Self::AutoListing => Role::Seller,
            Self::Requirement | Self::AutoRequirement => Role::Buyer,
        }
    }

    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            Self::Listing => "listings",
            Self::Requirement => "requirements",
            Self::AutoListing => "auto_listings",
            Self::AutoRequirement => "auto_requirements",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Requirement => "requirement",
            Self::AutoListing => "auto_listing",
            Self::AutoRequirement => "auto_requirement",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    /// Accepts singular or plural names with `-` or `_` separators,
    /// e.g. `listings`, `auto-requirements`, `auto_listing`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        match singular {
            "listing" => Ok(Self::Listing),
            "requirement" => Ok(Self::Requirement),
            "auto_listing" => Ok(Self::AutoListing),
            "auto_requirement" => Ok(Self::AutoRequirement),
            _ => Err(anyhow::anyhow!("Invalid entity kind: {}", s)),
        }
    }
}

/// Who asks for a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    /// A moderator working through the admin console
    Operator,
    /// The time-driven expiry sweep
    Scheduler,
}

/// A status change rejected by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move {kind} from {from} to {to}")]
pub struct TransitionError {
    pub kind: EntityKind,
    pub from: ModerationStatus,
    pub to: ModerationStatus,
}

/// Validate a single status change.
///
/// Identity transitions are rejected like any other pair not in the table.
pub fn check_transition(
    kind: EntityKind,
    from: ModerationStatus,
    to: ModerationStatus,
    actor: Actor,
) -> Result<(), TransitionError> {
    use ModerationStatus::*;

    let allowed = match (actor, from, to) {
        (Actor::Operator, PendingModeration, Active) => true,
        (Actor::Operator, PendingModeration | Active, Rejected) => true,
        (Actor::Operator, Active, Inactive) | (Actor::Operator, Inactive, Active) => {
            kind.role() == Role::Buyer
        }
        (Actor::Operator, from, Deleted) => !from.is_terminal(),
        (Actor::Scheduler, Active, Expired) => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(TransitionError { kind, from, to })
    }
}

/// Status filter for list and count queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    /// Every status except `deleted`
    #[default]
    All,
    Only(ModerationStatus),
}

impl FromStr for StatusFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Only)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ModerationStatus::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_status_roundtrip() {
        for status in ModerationStatus::ALL {
            assert_eq!(status.as_str().parse::<ModerationStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("archived".parse::<ModerationStatus>().is_err());
    }

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("listings".parse::<EntityKind>().unwrap(), EntityKind::Listing);
        assert_eq!("requirement".parse::<EntityKind>().unwrap(), EntityKind::Requirement);
        assert_eq!(
            "auto-listings".parse::<EntityKind>().unwrap(),
            EntityKind::AutoListing
        );
        assert_eq!(
            "Auto_Requirements".parse::<EntityKind>().unwrap(),
            EntityKind::AutoRequirement
        );
        assert!("cars".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_kind_axes() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::new(kind.domain(), kind.role()), kind);
        }
        assert_eq!(EntityKind::AutoRequirement.table(), "auto_requirements");
    }

    #[test]
    fn test_operator_transitions() {
        let kind = EntityKind::Listing;
        assert!(check_transition(kind, PendingModeration, Active, Actor::Operator).is_ok());
        assert!(check_transition(kind, PendingModeration, Rejected, Actor::Operator).is_ok());
        assert!(check_transition(kind, Active, Rejected, Actor::Operator).is_ok());
        assert!(check_transition(kind, Rejected, Deleted, Actor::Operator).is_ok());
        assert!(check_transition(kind, Rejected, Active, Actor::Operator).is_err());
        assert!(check_transition(kind, Deleted, Active, Actor::Operator).is_err());
        assert!(check_transition(kind, Active, Active, Actor::Operator).is_err());
    }

    #[test]
    fn test_pause_only_for_requirements() {
        assert!(check_transition(EntityKind::Listing, Active, Inactive, Actor::Operator).is_err());
        assert!(
            check_transition(EntityKind::AutoListing, Active, Inactive, Actor::Operator).is_err()
        );
        for kind in [EntityKind::Requirement, EntityKind::AutoRequirement] {
            assert!(check_transition(kind, Active, Inactive, Actor::Operator).is_ok());
            assert!(check_transition(kind, Inactive, Active, Actor::Operator).is_ok());
        }
    }

    #[test]
    fn test_expiry_reserved_for_scheduler() {
        let kind = EntityKind::Requirement;
        assert!(check_transition(kind, Active, Expired, Actor::Operator).is_err());
        assert!(check_transition(kind, Active, Expired, Actor::Scheduler).is_ok());
        assert!(check_transition(kind, PendingModeration, Expired, Actor::Scheduler).is_err());
        assert!(check_transition(kind, Active, Deleted, Actor::Scheduler).is_err());
    }

    #[test]
    fn test_status_filter_parsing() {
        assert_eq!("all".parse::<StatusFilter>().unwrap(), StatusFilter::All);
        assert_eq!(
            "deleted".parse::<StatusFilter>().unwrap(),
            StatusFilter::Only(Deleted)
        );
        assert!("bogus".parse::<StatusFilter>().is_err());
    }

    fn any_status() -> impl Strategy<Value = ModerationStatus> {
        proptest::sample::select(ModerationStatus::ALL.to_vec())
    }

    fn any_kind() -> impl Strategy<Value = EntityKind> {
        proptest::sample::select(EntityKind::ALL.to_vec())
    }

    fn any_actor() -> impl Strategy<Value = Actor> {
        prop_oneof![Just(Actor::Operator), Just(Actor::Scheduler)]
    }

    proptest! {
        #[test]
        fn deleted_is_terminal(kind in any_kind(), to in any_status(), actor in any_actor()) {
            prop_assert!(check_transition(kind, Deleted, to, actor).is_err());
        }

        #[test]
        fn identity_transitions_rejected(kind in any_kind(), status in any_status(), actor in any_actor()) {
            prop_assert!(check_transition(kind, status, status, actor).is_err());
        }

        #[test]
        fn realty_and_auto_share_the_table(
            role in prop_oneof![Just(Role::Seller), Just(Role::Buyer)],
            from in any_status(),
            to in any_status(),
            actor in any_actor(),
        ) {
            let realty = check_transition(EntityKind::new(Domain::Realty, role), from, to, actor).is_ok();
            let auto = check_transition(EntityKind::new(Domain::Auto, role), from, to, actor).is_ok();
            prop_assert_eq!(realty, auto);
        }

        #[test]
        fn nothing_returns_to_pending(kind in any_kind(), from in any_status(), actor in any_actor()) {
            prop_assert!(check_transition(kind, from, PendingModeration, actor).is_err());
        }
    }
}
