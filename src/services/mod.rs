//! Services layer - Business logic
//!
//! Services enforce the domain rules on top of the repositories:
//! - the moderation state machine for listings and requirements
//! - curation of the recommended feed, manual and random
//! - dashboard statistics
//! - platform settings and user administration

pub mod curator;
pub mod moderation;
pub mod settings;
pub mod stats;
pub mod user;

pub use curator::{sample_batch, CuratorError, CuratorService};
pub use moderation::{ExpiryReport, ModerationError, ModerationService, SuspensionReport};
pub use settings::{PlatformSettings, SettingsService, SettingsServiceError, SettingsUpdate};
pub use stats::{
    percent, DomainStats, EntityCounts, PlatformStats, ReportWindow, StatsService, UserCounts,
};
pub use user::{BlockOutcome, UserService, UserServiceError};
