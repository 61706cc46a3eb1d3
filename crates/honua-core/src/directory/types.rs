use serde::{Deserialize, Serialize};

use crate::tenant::Tenant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Tenant,
    pub name: String,
}

/// A hub entity (sensor, switch, light, ...) known to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub tenant: Tenant,
    /// Hub key such as `sensor.temperature`.
    pub entity_id: String,
    pub name: String,
    pub is_device: bool,
    pub allow_rules: bool,
    pub has_numeric_state: bool,
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntity {
    pub entity_id: String,
    pub name: String,
    #[serde(default)]
    pub is_device: bool,
    #[serde(default)]
    pub allow_rules: bool,
    #[serde(default)]
    pub has_numeric_state: bool,
    #[serde(default)]
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HassService {
    pub id: i64,
    pub tenant: Tenant,
    /// Service domain such as `light.turn_on`.
    pub domain: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHassService {
    pub domain: String,
    pub name: String,
}
