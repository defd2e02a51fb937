//! Driver record as held by the driver service and pushed to sessions.

use serde::{Deserialize, Serialize};

use super::Coordinate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    pub name: String,
    /// Tier this driver serves.
    #[serde(rename = "packageSlug")]
    pub package_slug: String,
    pub location: Coordinate,
    #[serde(rename = "carPlate")]
    pub car_plate: String,
    #[serde(rename = "profilePicture")]
    pub profile_picture: String,
}

impl Driver {
    pub fn serves(&self, tier: &str) -> bool {
        self.package_slug == tier
    }
}
