use std::collections::HashMap;

use libsql::{Connection, Row, params};
use tracing::{debug, info, instrument, warn};

use crate::db::{Database, settle};
use crate::directory::repositories::{entity_id_of, resolve_entity};
use crate::error::StoreError;
use crate::ids::{TenantTable, next_id_expr};
use crate::tenant::Tenant;

use super::mapping::{ConditionRow, assemble, flatten, leaf_columns};
use super::types::{Condition, ConditionType};

const CONDITION_COLUMNS: &str =
    "id, type, sensor_id, before_time, after_time, below, above, comparison_state, parent_id";

#[derive(Clone)]
pub struct ConditionRepository {
    db: Database,
}

impl ConditionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a whole tree and return the id of its root.
    #[instrument(skip_all, fields(tenant = %tenant))]
    pub async fn add_tree(&self, tenant: &Tenant, condition: &Condition) -> Result<i64, StoreError> {
        let session = self.db.session().await?;
        let tx = session.transaction().await?;
        let result = insert_tree(&tx, tenant, condition).await;
        let root_id = settle(tx, result).await?;
        info!(root_id, "condition tree stored");
        Ok(root_id)
    }

    #[instrument(skip_all, fields(tenant = %tenant, id = id))]
    pub async fn fetch_tree(&self, tenant: &Tenant, id: i64) -> Result<Condition, StoreError> {
        let session = self.db.session().await?;
        load_tree(&session, tenant, id).await
    }

    /// Update a stored tree in place, matching nodes by id. Either the whole
    /// edit applies or nothing does.
    #[instrument(skip_all, fields(tenant = %tenant, id = ?condition.id()))]
    pub async fn edit_tree(&self, tenant: &Tenant, condition: &Condition) -> Result<(), StoreError> {
        let session = self.db.session().await?;
        let tx = session.transaction().await?;
        let result = update_tree(&tx, tenant, condition).await;
        if let Err(err) = &result {
            warn!(error = %err, "condition edit rejected");
        }
        settle(tx, result).await
    }

    /// Delete a node and, through the parent foreign key, all of its
    /// descendants. A rule rooted at the node goes with it.
    #[instrument(skip_all, fields(tenant = %tenant, id = id))]
    pub async fn delete_tree(&self, tenant: &Tenant, id: i64) -> Result<(), StoreError> {
        let session = self.db.session().await?;
        let tx = session.transaction().await?;
        let result = remove_tree(&tx, tenant, id).await;
        settle(tx, result).await?;
        info!("condition tree deleted");
        Ok(())
    }

    pub async fn exists(&self, tenant: &Tenant, id: i64) -> Result<bool, StoreError> {
        let session = self.db.session().await?;
        condition_exists(&session, tenant, id).await
    }
}

pub(crate) async fn insert_tree(
    conn: &Connection,
    tenant: &Tenant,
    condition: &Condition,
) -> Result<i64, StoreError> {
    condition.validate()?;
    let nodes = flatten(condition);

    let mut sensor_ids: HashMap<&str, i64> = HashMap::new();
    for node in &nodes {
        if let Some(sensor) = node.predicate.and_then(|predicate| predicate.sensor()) {
            if !sensor_ids.contains_key(sensor) {
                let id = entity_id_of(conn, tenant, sensor).await?;
                sensor_ids.insert(sensor, id);
            }
        }
    }

    let mut ids: Vec<i64> = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let columns = leaf_columns(node.predicate);
        let sensor_id = columns.sensor.and_then(|key| sensor_ids.get(key).copied());
        let parent_id = node.parent.map(|index| ids[index]);

        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO conditions (
                        id, tenant, type, sensor_id, before_time, after_time, below, above, comparison_state, parent_id
                    ) VALUES ({}, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    RETURNING id",
                    next_id_expr(TenantTable::Conditions, 1)
                ),
                params![
                    tenant.as_str(),
                    node.condition_type.as_str(),
                    sensor_id,
                    columns.before,
                    columns.after,
                    columns.below,
                    columns.above,
                    columns.comparison_state,
                    parent_id
                ],
            )
            .await?;

        let id: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => return Err(StoreError::no_row("conditions")),
        };
        ids.push(id);
    }

    debug!(nodes = ids.len(), "inserted condition rows");
    ids.first()
        .copied()
        .ok_or_else(|| StoreError::no_row("conditions"))
}

pub(crate) async fn load_tree(
    conn: &Connection,
    tenant: &Tenant,
    id: i64,
) -> Result<Condition, StoreError> {
    let mut rows = conn
        .query(
            &format!(
                "WITH RECURSIVE subtree(id) AS (
                    SELECT id FROM conditions WHERE tenant = ?1 AND id = ?2
                    UNION ALL
                    SELECT c.id FROM conditions c
                    JOIN subtree s ON c.parent_id = s.id
                    WHERE c.tenant = ?1
                )
                SELECT {CONDITION_COLUMNS} FROM conditions
                WHERE tenant = ?1 AND id IN (SELECT id FROM subtree)
                ORDER BY id"
            ),
            params![tenant.as_str(), id],
        )
        .await?;

    let mut condition_rows = Vec::new();
    while let Some(row) = rows.next().await? {
        condition_rows.push(row_to_condition(row)?);
    }
    if condition_rows.is_empty() {
        return Err(StoreError::not_found("condition", id));
    }

    let mut sensors = HashMap::new();
    for sensor_id in condition_rows.iter().filter_map(|row| row.sensor_id) {
        if !sensors.contains_key(&sensor_id) {
            let entity = resolve_entity(conn, tenant, sensor_id).await?;
            sensors.insert(sensor_id, entity.entity_id);
        }
    }

    debug!(rows = condition_rows.len(), "assembling condition tree");
    assemble(id, &condition_rows, &sensors)
}

/// Walks the supplied tree iteratively. Every node is checked against its
/// stored row before it is written, so a rejected node aborts the walk and the
/// caller's transaction discards earlier writes.
async fn update_tree(
    conn: &Connection,
    tenant: &Tenant,
    condition: &Condition,
) -> Result<(), StoreError> {
    let mut stack: Vec<(&Condition, Option<i64>)> = vec![(condition, None)];

    while let Some((node, expected_parent)) = stack.pop() {
        let id = node
            .id()
            .ok_or_else(|| StoreError::not_found("condition", "missing id"))?;
        let stored = stored_node(conn, tenant, id).await?;

        if let Some(parent) = expected_parent {
            if stored.parent_id != Some(parent) {
                return Err(StoreError::transition(
                    id,
                    format!("not a child of condition {parent}"),
                ));
            }
        }

        match node {
            Condition::Logical(logical) => {
                if stored.parent_id.is_some() {
                    return Err(StoreError::transition(
                        id,
                        "composite types are only allowed on a root",
                    ));
                }
                conn.execute(
                    "UPDATE conditions
                     SET type = ?3, sensor_id = NULL, before_time = NULL, after_time = NULL,
                         below = NULL, above = NULL, comparison_state = NULL
                     WHERE tenant = ?1 AND id = ?2",
                    params![tenant.as_str(), id, logical.op.condition_type().as_str()],
                )
                .await?;
                for child in logical.children.iter().rev() {
                    stack.push((child, Some(id)));
                }
            }
            Condition::Leaf(leaf) => {
                if stored.parent_id.is_none() {
                    return Err(StoreError::transition(
                        id,
                        "leaf types are not allowed on a root",
                    ));
                }
                if stored.condition_type.is_composite() && has_children(conn, tenant, id).await? {
                    return Err(StoreError::transition(
                        id,
                        "cannot turn a node with children into a leaf",
                    ));
                }
                leaf.predicate.validate(&id.to_string())?;

                let columns = leaf_columns(Some(&leaf.predicate));
                let sensor_id = match columns.sensor {
                    Some(key) => Some(entity_id_of(conn, tenant, key).await?),
                    None => None,
                };
                conn.execute(
                    "UPDATE conditions
                     SET type = ?3, sensor_id = ?4, before_time = ?5, after_time = ?6,
                         below = ?7, above = ?8, comparison_state = ?9
                     WHERE tenant = ?1 AND id = ?2",
                    params![
                        tenant.as_str(),
                        id,
                        leaf.predicate.condition_type().as_str(),
                        sensor_id,
                        columns.before,
                        columns.after,
                        columns.below,
                        columns.above,
                        columns.comparison_state
                    ],
                )
                .await?;
            }
        }
    }

    Ok(())
}

pub(crate) async fn remove_tree(conn: &Connection, tenant: &Tenant, id: i64) -> Result<(), StoreError> {
    if !condition_exists(conn, tenant, id).await? {
        return Err(StoreError::not_found("condition", id));
    }

    let purged = conn
        .execute(
            "DELETE FROM delays
             WHERE tenant = ?1 AND id IN (
                SELECT a.delay_id FROM actions a
                JOIN rules r ON r.tenant = a.tenant AND r.id = a.rule_id
                WHERE a.tenant = ?1 AND r.condition_id = ?2 AND a.delay_id IS NOT NULL
             )",
            params![tenant.as_str(), id],
        )
        .await?;
    if purged > 0 {
        debug!(purged, "purged delays of rule actions");
    }

    conn.execute(
        "DELETE FROM conditions WHERE tenant = ?1 AND id = ?2",
        params![tenant.as_str(), id],
    )
    .await?;
    Ok(())
}

async fn condition_exists(conn: &Connection, tenant: &Tenant, id: i64) -> Result<bool, StoreError> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM conditions WHERE tenant = ?1 AND id = ?2",
            params![tenant.as_str(), id],
        )
        .await?;
    Ok(rows.next().await?.is_some())
}

async fn has_children(conn: &Connection, tenant: &Tenant, id: i64) -> Result<bool, StoreError> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM conditions WHERE tenant = ?1 AND parent_id = ?2 LIMIT 1",
            params![tenant.as_str(), id],
        )
        .await?;
    Ok(rows.next().await?.is_some())
}

async fn stored_node(conn: &Connection, tenant: &Tenant, id: i64) -> Result<ConditionRow, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {CONDITION_COLUMNS} FROM conditions WHERE tenant = ?1 AND id = ?2"),
            params![tenant.as_str(), id],
        )
        .await?;

    match rows.next().await? {
        Some(row) => row_to_condition(row),
        None => Err(StoreError::not_found("condition", id)),
    }
}

fn row_to_condition(row: Row) -> Result<ConditionRow, StoreError> {
    let condition_type: String = row.get(1)?;
    let condition_type = ConditionType::from_str(&condition_type).ok_or_else(|| {
        StoreError::UnsupportedType {
            kind: "condition",
            value: condition_type.clone(),
        }
    })?;

    Ok(ConditionRow {
        id: row.get(0)?,
        condition_type,
        sensor_id: row.get(2)?,
        before: row.get(3)?,
        after: row.get(4)?,
        below: row.get(5)?,
        above: row.get(6)?,
        comparison_state: row.get(7)?,
        parent_id: row.get(8)?,
    })
}
