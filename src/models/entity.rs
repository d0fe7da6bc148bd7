//! Listings and requirements of both marketplace domains

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::moderation::{EntityKind, ModerationStatus};

const MIN_ROOMS: i64 = 1;
const MAX_ROOMS: i64 = 20;
const MIN_YEAR: i64 = 1900;
const MAX_YEAR: i64 = 2100;

/// Sale or rent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealType {
    Sale,
    Rent,
}

impl DealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Rent => "rent",
        }
    }
}

impl fmt::Display for DealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sale" => Ok(Self::Sale),
            "rent" => Ok(Self::Rent),
            _ => Err(anyhow::anyhow!("Invalid deal type: {}", s)),
        }
    }
}

/// A seller's realty offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtyListingDetails {
    pub price: i64,
    #[serde(default)]
    pub rooms: Option<i64>,
    pub area: f64,
    #[serde(default)]
    pub floor: Option<i64>,
    #[serde(default)]
    pub building_floors: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A buyer's realty search criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtyRequirementDetails {
    pub deal_type: DealType,
    #[serde(default)]
    pub price_min: Option<i64>,
    #[serde(default)]
    pub price_max: Option<i64>,
    #[serde(default)]
    pub rooms_min: Option<i64>,
    #[serde(default)]
    pub rooms_max: Option<i64>,
    #[serde(default)]
    pub area_min: Option<f64>,
    #[serde(default)]
    pub area_max: Option<f64>,
}

/// A seller's vehicle offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoListingDetails {
    pub deal_type: DealType,
    pub brand: String,
    pub model: String,
    pub year: i64,
    #[serde(default)]
    pub mileage: Option<i64>,
    pub price: i64,
    pub city: String,
}

/// A buyer's vehicle search criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoRequirementDetails {
    pub deal_type: DealType,
    /// Acceptable brands; empty means any
    #[serde(default)]
    pub brands: BTreeSet<String>,
    #[serde(default)]
    pub year_min: Option<i64>,
    #[serde(default)]
    pub year_max: Option<i64>,
    #[serde(default)]
    pub price_min: Option<i64>,
    #[serde(default)]
    pub price_max: Option<i64>,
    #[serde(default)]
    pub mileage_max: Option<i64>,
    #[serde(default)]
    pub city: Option<String>,
}

/// Kind-specific fields of a moderated entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityDetails {
    Listing(RealtyListingDetails),
    Requirement(RealtyRequirementDetails),
    AutoListing(AutoListingDetails),
    AutoRequirement(AutoRequirementDetails),
}

impl EntityDetails {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Listing(_) => EntityKind::Listing,
            Self::Requirement(_) => EntityKind::Requirement,
            Self::AutoListing(_) => EntityKind::AutoListing,
            Self::AutoRequirement(_) => EntityKind::AutoRequirement,
        }
    }

    /// Check field constraints, returning a message for the first violation
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Listing(d) => {
                if d.price <= 0 {
                    return Err("price must be positive".to_string());
                }
                if !(d.area.is_finite() && d.area > 0.0) {
                    return Err("area must be positive".to_string());
                }
                if let Some(rooms) = d.rooms {
                    check_rooms("rooms", rooms)?;
                }
                if let Some(total) = d.building_floors {
                    if total < 1 {
                        return Err("building_floors must be at least 1".to_string());
                    }
                    if let Some(floor) = d.floor {
                        if floor > total {
                            return Err(format!(
                                "floor {} exceeds building_floors {}",
                                floor, total
                            ));
                        }
                    }
                }
                Ok(())
            }
            Self::Requirement(d) => {
                check_range("price", d.price_min, d.price_max, 0)?;
                check_range("area", d.area_min, d.area_max, 0.0)?;
                check_range("rooms", d.rooms_min, d.rooms_max, MIN_ROOMS)?;
                if let Some(rooms) = d.rooms_max {
                    check_rooms("rooms_max", rooms)?;
                }
                Ok(())
            }
            Self::AutoListing(d) => {
                check_non_empty("brand", &d.brand)?;
                check_non_empty("model", &d.model)?;
                check_non_empty("city", &d.city)?;
                check_year("year", d.year)?;
                if d.price <= 0 {
                    return Err("price must be positive".to_string());
                }
                if matches!(d.mileage, Some(m) if m < 0) {
                    return Err("mileage must not be negative".to_string());
                }
                Ok(())
            }
            Self::AutoRequirement(d) => {
                for brand in &d.brands {
                    check_non_empty("brands", brand)?;
                }
                check_range("year", d.year_min, d.year_max, MIN_YEAR)?;
                if let Some(year) = d.year_max {
                    check_year("year_max", year)?;
                }
                check_range("price", d.price_min, d.price_max, 0)?;
                if matches!(d.mileage_max, Some(m) if m < 0) {
                    return Err("mileage_max must not be negative".to_string());
                }
                Ok(())
            }
        }
    }
}

fn check_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{} must not be empty", field))
    } else {
        Ok(())
    }
}

fn check_rooms(field: &str, rooms: i64) -> Result<(), String> {
    if (MIN_ROOMS..=MAX_ROOMS).contains(&rooms) {
        Ok(())
    } else {
        Err(format!(
            "{} must be between {} and {}",
            field, MIN_ROOMS, MAX_ROOMS
        ))
    }
}

fn check_year(field: &str, year: i64) -> Result<(), String> {
    if (MIN_YEAR..=MAX_YEAR).contains(&year) {
        Ok(())
    } else {
        Err(format!("{} must be between {} and {}", field, MIN_YEAR, MAX_YEAR))
    }
}

/// Both bounds must be at least `floor`, and `min <= max` when both are set.
fn check_range<T>(field: &str, min: Option<T>, max: Option<T>, floor: T) -> Result<(), String>
where
    T: PartialOrd + Copy + fmt::Display,
{
    for bound in [min, max].into_iter().flatten() {
        // NaN compares as None and is rejected
        if bound.partial_cmp(&floor).map_or(true, |o| o.is_lt()) {
            return Err(format!("{} bounds must be at least {}", field, floor));
        }
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(format!("{}_min {} exceeds {}_max {}", field, min, field, max));
        }
    }
    Ok(())
}

/// A stored listing or requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: i64,
    pub user_id: i64,
    pub status: ModerationStatus,
    pub rejection_reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: EntityDetails,
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        self.details.kind()
    }
}

/// Input for submitting a new listing or requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub user_id: i64,
    #[serde(flatten)]
    pub details: EntityDetails,
}
