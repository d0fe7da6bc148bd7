//! Data models
//!
//! Entities stored by the repositories plus the request and response shapes
//! built on them.

mod entity;
mod moderation;
mod pagination;
mod recommended;
mod user;

pub use entity::{
    AutoListingDetails, AutoRequirementDetails, DealType, EntityDetails, EntityRecord, NewEntity,
    RealtyListingDetails, RealtyRequirementDetails,
};
pub use moderation::{
    check_transition, Actor, Domain, EntityKind, ModerationStatus, Role, StatusFilter,
    TransitionError,
};
pub use pagination::{ListParams, PagedResult};
pub use recommended::{
    ListingSnapshot, RandomModeOutcome, RecommendedEntry, RecommendedItem, RecommendedListing,
};
pub use user::{BlockFilter, CreateUserInput, Subscription, User, UserLimits, UserSummary};
