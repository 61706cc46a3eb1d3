//! Tenants, entities and hass services: the lookups the rule store resolves
//! references through.

pub mod repositories;
pub mod types;

pub use repositories::{EntityRepository, HassServiceRepository, IdentityRepository};
pub use types::{Entity, HassService, Identity, NewEntity, NewHassService};
