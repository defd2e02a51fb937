//! Connection query parameters.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("userID is required")]
    MissingUserId,
    #[error("packageSlug is required")]
    MissingPackageSlug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiderParams {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverParams {
    pub user_id: String,
    pub package_slug: String,
}

fn first_present(query: &HashMap<String, String>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| query.get(*name))
        .find(|value| !value.is_empty())
        .cloned()
}

impl RiderParams {
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let user_id =
            first_present(query, &["userID", "sessionKey"]).ok_or(ValidationError::MissingUserId)?;
        Ok(Self { user_id })
    }
}

impl DriverParams {
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let RiderParams { user_id } = RiderParams::from_query(query)?;
        let package_slug = first_present(query, &["packageSlug", "tier"])
            .ok_or(ValidationError::MissingPackageSlug)?;
        Ok(Self {
            user_id,
            package_slug,
        })
    }
}
