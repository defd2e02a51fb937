//! Per-package fare estimation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Route;

/// A priced offer for one package tier, owned by the rider who previewed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideFare {
    pub id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    /// Tier drivers must match.
    #[serde(rename = "packageSlug")]
    pub package_slug: String,
    #[serde(rename = "totalPriceInCents")]
    pub total_price_cents: i64,
    #[serde(default)]
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PackagePricing {
    pub slug: String,
    pub multiplier: f64,
}

impl PackagePricing {
    fn new(slug: &str, multiplier: f64) -> Self {
        Self {
            slug: slug.to_string(),
            multiplier,
        }
    }
}

/// Pricing knobs, loaded from the `pricing` config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub base_fare_cents: i64,
    pub per_km_cents: f64,
    pub per_minute_cents: f64,
    pub packages: Vec<PackagePricing>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fare_cents: 250,
            per_km_cents: 150.0,
            per_minute_cents: 25.0,
            packages: vec![
                PackagePricing::new("sedan", 1.0),
                PackagePricing::new("suv", 1.3),
                PackagePricing::new("van", 1.5),
                PackagePricing::new("luxury", 2.0),
            ],
        }
    }
}

/// One fare per configured package for `route`.
pub fn estimate_fares(user_id: &str, route: &Route, pricing: &PricingConfig) -> Vec<RideFare> {
    let km = route.distance / 1000.0;
    let minutes = route.duration / 60.0;
    let base = pricing.base_fare_cents as f64
        + km * pricing.per_km_cents
        + minutes * pricing.per_minute_cents;

    pricing
        .packages
        .iter()
        .map(|package| RideFare {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            package_slug: package.slug.clone(),
            total_price_cents: (base * package.multiplier).round() as i64,
            route: route.clone(),
        })
        .collect()
}
