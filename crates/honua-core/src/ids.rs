//! Per-tenant sequential ids.
//!
//! Every tenant-scoped table numbers its rows independently per tenant,
//! starting at 0. Inserts embed [`next_id_expr`] as a sub-select so the id is
//! computed and consumed by a single statement; [`next_id`] evaluates the same
//! expression without reserving anything.

use libsql::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::StoreError;
use crate::tenant::Tenant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantTable {
    Conditions,
    Rules,
    Actions,
    Delays,
    Entities,
    HassServices,
}

impl TenantTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantTable::Conditions => "conditions",
            TenantTable::Rules => "rules",
            TenantTable::Actions => "actions",
            TenantTable::Delays => "delays",
            TenantTable::Entities => "entities",
            TenantTable::HassServices => "hass_services",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "conditions" => Some(Self::Conditions),
            "rules" => Some(Self::Rules),
            "actions" => Some(Self::Actions),
            "delays" => Some(Self::Delays),
            "entities" => Some(Self::Entities),
            "hass_services" => Some(Self::HassServices),
            _ => None,
        }
    }
}

/// SQL expression yielding the next id of `table` for the tenant bound to
/// parameter `?{tenant_param}`.
pub(crate) fn next_id_expr(table: TenantTable, tenant_param: usize) -> String {
    format!(
        "(SELECT COALESCE(MAX(id) + 1, 0) FROM {} WHERE tenant = ?{tenant_param})",
        table.as_str()
    )
}

pub(crate) async fn next_id(
    conn: &Connection,
    tenant: &Tenant,
    table: TenantTable,
) -> Result<i64, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {}", next_id_expr(table, 1)),
            params![tenant.as_str()],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

#[derive(Clone)]
pub struct IdAllocator {
    db: Database,
}

impl IdAllocator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The id the next insert into `table` would receive for `tenant`.
    /// Reserves nothing: asking twice without an insert yields the same value.
    pub async fn next_id(&self, tenant: &Tenant, table: TenantTable) -> Result<i64, StoreError> {
        let session = self.db.session().await?;
        next_id(&session, tenant, table).await
    }
}
