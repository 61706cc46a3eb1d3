use libsql::{Connection, Row, params};
use tracing::info;

use crate::db::Database;
use crate::error::StoreError;
use crate::ids::{TenantTable, next_id_expr};
use crate::tenant::Tenant;

use super::types::{Entity, HassService, Identity, NewEntity, NewHassService};

const IDENTITY_COLUMNS: &str = "id, name";
const ENTITY_COLUMNS: &str =
    "id, tenant, entity_id, name, is_device, allow_rules, has_numeric_state, attribute";
const HASS_SERVICE_COLUMNS: &str = "id, tenant, domain, name, enabled";

#[derive(Clone)]
pub struct IdentityRepository {
    db: Database,
}

impl IdentityRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, tenant: &Tenant, name: &str) -> Result<Identity, StoreError> {
        let session = self.db.session().await?;
        if identity_exists(&session, tenant).await? {
            return Err(StoreError::invalid("identity", tenant, "already exists"));
        }
        let mut rows = session
            .query(
                &format!("INSERT INTO identities (id, name) VALUES (?1, ?2) RETURNING {IDENTITY_COLUMNS}"),
                params![tenant.as_str(), name],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                info!(tenant = %tenant, "identity created");
                row_to_identity(row)
            }
            None => Err(StoreError::no_row("identities")),
        }
    }

    pub async fn exists(&self, tenant: &Tenant) -> Result<bool, StoreError> {
        let session = self.db.session().await?;
        identity_exists(&session, tenant).await
    }

    pub async fn get(&self, tenant: &Tenant) -> Result<Identity, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = ?1"),
                params![tenant.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_identity(row),
            None => Err(StoreError::not_found("identity", tenant)),
        }
    }

    pub async fn list(&self) -> Result<Vec<Identity>, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                &format!("SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY id"),
                (),
            )
            .await?;

        let mut identities = Vec::new();
        while let Some(row) = rows.next().await? {
            identities.push(row_to_identity(row)?);
        }
        Ok(identities)
    }

    /// Remove a tenant together with every row scoped to it.
    pub async fn delete(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let session = self.db.session().await?;
        let affected = session
            .execute(
                "DELETE FROM identities WHERE id = ?1",
                params![tenant.as_str()],
            )
            .await?;
        if affected == 0 {
            return Err(StoreError::not_found("identity", tenant));
        }
        info!(tenant = %tenant, "identity deleted");
        Ok(())
    }
}

#[derive(Clone)]
pub struct EntityRepository {
    db: Database,
}

impl EntityRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, tenant: &Tenant, new_entity: NewEntity) -> Result<Entity, StoreError> {
        if new_entity.entity_id.trim().is_empty() {
            return Err(StoreError::invalid("entity", "", "entity key must not be empty"));
        }
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                &format!(
                    "INSERT INTO entities (
                        id, tenant, entity_id, name, is_device, allow_rules, has_numeric_state, attribute
                    ) VALUES ({}, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    RETURNING {ENTITY_COLUMNS}",
                    next_id_expr(TenantTable::Entities, 1)
                ),
                params![
                    tenant.as_str(),
                    new_entity.entity_id.as_str(),
                    new_entity.name.as_str(),
                    new_entity.is_device as i64,
                    new_entity.allow_rules as i64,
                    new_entity.has_numeric_state as i64,
                    new_entity.attribute
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_entity(row),
            None => Err(StoreError::no_row("entities")),
        }
    }

    pub async fn resolve(&self, tenant: &Tenant, id: i64) -> Result<Entity, StoreError> {
        let session = self.db.session().await?;
        resolve_entity(&session, tenant, id).await
    }

    pub async fn exists(&self, tenant: &Tenant, entity_key: &str) -> Result<bool, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                "SELECT 1 FROM entities WHERE tenant = ?1 AND entity_id = ?2",
                params![tenant.as_str(), entity_key],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn id_of(&self, tenant: &Tenant, entity_key: &str) -> Result<i64, StoreError> {
        let session = self.db.session().await?;
        entity_id_of(&session, tenant, entity_key).await
    }

    pub async fn list(&self, tenant: &Tenant) -> Result<Vec<Entity>, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE tenant = ?1 ORDER BY id"),
                params![tenant.as_str()],
            )
            .await?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            entities.push(row_to_entity(row)?);
        }
        Ok(entities)
    }
}

#[derive(Clone)]
pub struct HassServiceRepository {
    db: Database,
}

impl HassServiceRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        tenant: &Tenant,
        new_service: NewHassService,
    ) -> Result<HassService, StoreError> {
        if new_service.domain.trim().is_empty() {
            return Err(StoreError::invalid("hass service", "", "domain must not be empty"));
        }
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                &format!(
                    "INSERT INTO hass_services (id, tenant, domain, name, enabled)
                     VALUES ({}, ?1, ?2, ?3, 1)
                     RETURNING {HASS_SERVICE_COLUMNS}",
                    next_id_expr(TenantTable::HassServices, 1)
                ),
                params![tenant.as_str(), new_service.domain.as_str(), new_service.name.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_hass_service(row),
            None => Err(StoreError::no_row("hass_services")),
        }
    }

    pub async fn id_of(&self, tenant: &Tenant, domain: &str) -> Result<i64, StoreError> {
        let session = self.db.session().await?;
        service_id_of(&session, tenant, domain).await
    }

    pub async fn resolve(&self, tenant: &Tenant, id: i64) -> Result<HassService, StoreError> {
        let session = self.db.session().await?;
        resolve_service(&session, tenant, id).await
    }

    pub async fn exists(&self, tenant: &Tenant, domain: &str) -> Result<bool, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                "SELECT 1 FROM hass_services WHERE tenant = ?1 AND domain = ?2",
                params![tenant.as_str(), domain],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Flip the enabled flag of the service with `domain`.
    pub async fn toggle(&self, tenant: &Tenant, domain: &str) -> Result<HassService, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                &format!(
                    "UPDATE hass_services SET enabled = 1 - enabled
                     WHERE tenant = ?1 AND domain = ?2
                     RETURNING {HASS_SERVICE_COLUMNS}"
                ),
                params![tenant.as_str(), domain],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_hass_service(row),
            None => Err(StoreError::not_found("hass service", domain)),
        }
    }
}

async fn identity_exists(conn: &Connection, tenant: &Tenant) -> Result<bool, StoreError> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM identities WHERE id = ?1",
            params![tenant.as_str()],
        )
        .await?;
    Ok(rows.next().await?.is_some())
}

pub(crate) async fn resolve_entity(
    conn: &Connection,
    tenant: &Tenant,
    id: i64,
) -> Result<Entity, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE tenant = ?1 AND id = ?2"),
            params![tenant.as_str(), id],
        )
        .await?;

    match rows.next().await? {
        Some(row) => row_to_entity(row),
        None => Err(StoreError::not_found("entity", id)),
    }
}

pub(crate) async fn entity_id_of(
    conn: &Connection,
    tenant: &Tenant,
    entity_key: &str,
) -> Result<i64, StoreError> {
    let mut rows = conn
        .query(
            "SELECT id FROM entities WHERE tenant = ?1 AND entity_id = ?2",
            params![tenant.as_str(), entity_key],
        )
        .await?;

    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Err(StoreError::not_found("entity", entity_key)),
    }
}

pub(crate) async fn service_id_of(
    conn: &Connection,
    tenant: &Tenant,
    domain: &str,
) -> Result<i64, StoreError> {
    let mut rows = conn
        .query(
            "SELECT id FROM hass_services WHERE tenant = ?1 AND domain = ?2",
            params![tenant.as_str(), domain],
        )
        .await?;

    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Err(StoreError::not_found("hass service", domain)),
    }
}

pub(crate) async fn resolve_service(
    conn: &Connection,
    tenant: &Tenant,
    id: i64,
) -> Result<HassService, StoreError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {HASS_SERVICE_COLUMNS} FROM hass_services WHERE tenant = ?1 AND id = ?2"
            ),
            params![tenant.as_str(), id],
        )
        .await?;

    match rows.next().await? {
        Some(row) => row_to_hass_service(row),
        None => Err(StoreError::not_found("hass service", id)),
    }
}

fn row_to_identity(row: Row) -> Result<Identity, StoreError> {
    let id: String = row.get(0)?;
    Ok(Identity {
        id: Tenant::new(id)?,
        name: row.get(1)?,
    })
}

pub(crate) fn row_to_entity(row: Row) -> Result<Entity, StoreError> {
    let tenant: String = row.get(1)?;
    let is_device: i64 = row.get(4)?;
    let allow_rules: i64 = row.get(5)?;
    let has_numeric_state: i64 = row.get(6)?;

    Ok(Entity {
        id: row.get(0)?,
        tenant: Tenant::new(tenant)?,
        entity_id: row.get(2)?,
        name: row.get(3)?,
        is_device: is_device != 0,
        allow_rules: allow_rules != 0,
        has_numeric_state: has_numeric_state != 0,
        attribute: row.get(7)?,
    })
}

fn row_to_hass_service(row: Row) -> Result<HassService, StoreError> {
    let tenant: String = row.get(1)?;
    let enabled: i64 = row.get(4)?;

    Ok(HassService {
        id: row.get(0)?,
        tenant: Tenant::new(tenant)?,
        domain: row.get(2)?,
        name: row.get(3)?,
        enabled: enabled != 0,
    })
}
