//! Common API utilities and shared types

use serde::Deserialize;

use crate::api::middleware::ApiError;
use crate::models::{EntityKind, ListParams, StatusFilter};

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Default page size for admin lists
pub fn default_per_page() -> u32 {
    20
}

/// Pagination query parameters
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl PaginationQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.per_page)
    }
}

/// Parse the `{kind}` path segment
pub fn parse_kind(raw: &str) -> Result<EntityKind, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("Unknown entity kind '{}'", raw)))
}

/// Parse a `?status=` filter; absent or `all` means every non-deleted status
pub fn parse_status_filter(raw: Option<&str>) -> Result<StatusFilter, ApiError> {
    raw.unwrap_or_default()
        .parse()
        .map_err(|e: anyhow::Error| ApiError::validation_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModerationStatus;

    #[test]
    fn test_parse_kind_spellings() {
        assert_eq!(parse_kind("auto-listings").unwrap(), EntityKind::AutoListing);
        assert_eq!(parse_kind("requirement").unwrap(), EntityKind::Requirement);
        assert_eq!(parse_kind("auto_requirements").unwrap(), EntityKind::AutoRequirement);
        assert_eq!(parse_kind("bikes").unwrap_err().error.code, "NOT_FOUND");
    }

    #[test]
    fn test_parse_status_filter() {
        assert_eq!(parse_status_filter(None).unwrap(), StatusFilter::All);
        assert_eq!(parse_status_filter(Some("all")).unwrap(), StatusFilter::All);
        assert_eq!(
            parse_status_filter(Some("deleted")).unwrap(),
            StatusFilter::Only(ModerationStatus::Deleted)
        );
        assert_eq!(
            parse_status_filter(Some("archived")).unwrap_err().error.code,
            "VALIDATION_ERROR"
        );
    }
}
