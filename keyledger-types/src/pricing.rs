//! The pricing catalog: tier id to {price, duration}.
//!
//! A catalog is built once at process start and shared immutably. Keys copy
//! the tier price at issuance, so replacing the catalog later never changes
//! existing keys.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const HOUR_MILLIS: i64 = 60 * 60 * 1000;

/// A named (price, duration) option for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingTier {
    /// Tier identifier (e.g. `"1d"`).
    #[serde(rename = "tierId")]
    pub id: String,
    /// Price in minor currency units.
    pub price: i64,
    /// How long a key of this tier stays valid.
    pub duration_millis: i64,
    /// Optional human label (e.g. `"1 Day"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PricingTier {
    /// Creates a tier without a label.
    #[must_use]
    pub fn new(id: impl Into<String>, price: i64, duration_millis: i64) -> Self {
        Self {
            id: id.into(),
            price,
            duration_millis,
            label: None,
        }
    }

    /// Sets the human label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Immutable, validated set of pricing tiers in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PricingCatalog {
    tiers: Vec<PricingTier>,
}

impl PricingCatalog {
    /// Builds a catalog, rejecting empty or duplicate ids and non-positive
    /// prices or durations.
    pub fn new(tiers: Vec<PricingTier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(Error::InvalidCatalog("catalog has no tiers".to_string()));
        }
        for (i, tier) in tiers.iter().enumerate() {
            if tier.id.trim().is_empty() {
                return Err(Error::InvalidCatalog(format!("tier #{i} has an empty id")));
            }
            if tier.price <= 0 {
                return Err(Error::InvalidCatalog(format!(
                    "tier {} has non-positive price {}",
                    tier.id, tier.price
                )));
            }
            if tier.duration_millis <= 0 {
                return Err(Error::InvalidCatalog(format!(
                    "tier {} has non-positive duration {}",
                    tier.id, tier.duration_millis
                )));
            }
            if tiers[..i].iter().any(|t| t.id == tier.id) {
                return Err(Error::InvalidCatalog(format!("duplicate tier id {}", tier.id)));
            }
        }
        Ok(Self { tiers })
    }

    /// The standard tier table, from one hour to sixty days.
    #[must_use]
    pub fn standard() -> Self {
        let table: [(&str, &str, i64, i64); 9] = [
            ("1h", "1 Hour", 1, 5),
            ("6h", "6 Hours", 6, 10),
            ("12h", "12 Hours", 12, 20),
            ("1d", "1 Day", 24, 50),
            ("3d", "3 Days", 72, 100),
            ("7d", "7 Days", 168, 200),
            ("15d", "15 Days", 360, 400),
            ("30d", "30 Days", 720, 700),
            ("60d", "60 Days", 1440, 1000),
        ];
        let tiers = table
            .into_iter()
            .map(|(id, label, hours, price)| {
                PricingTier::new(id, price, hours * HOUR_MILLIS).with_label(label)
            })
            .collect();
        Self { tiers }
    }

    /// Parses a catalog from a JSON array of tiers.
    pub fn from_json(json: &str) -> Result<Self> {
        let tiers: Vec<PricingTier> = serde_json::from_str(json)?;
        Self::new(tiers)
    }

    /// Loads a catalog from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Looks up a tier by id.
    #[must_use]
    pub fn get(&self, tier_id: &str) -> Option<&PricingTier> {
        self.tiers.iter().find(|t| t.id == tier_id)
    }

    /// Returns all tiers in display order.
    #[must_use]
    pub fn tiers(&self) -> &[PricingTier] {
        &self.tiers
    }
}

impl Default for PricingCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
