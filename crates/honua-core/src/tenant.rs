use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Tenant (identity) key every query is scoped by.
///
/// Store functions take `&Tenant` rather than a bare string so that an
/// unscoped query cannot be written by accident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tenant(String);

impl Tenant {
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidTenant);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Tenant {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Tenant::new(value)
    }
}

impl From<Tenant> for String {
    fn from(tenant: Tenant) -> Self {
        tenant.0
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
