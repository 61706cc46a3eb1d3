use libsql::{Connection, Row, params};
use tracing::{debug, info, instrument};

use crate::db::{Database, settle};
use crate::directory::repositories::{resolve_service, service_id_of};
use crate::error::StoreError;
use crate::ids::{TenantTable, next_id_expr};
use crate::tenant::Tenant;

use super::types::{Action, ActionKind, ActionType, Delay, NewAction, NewDelay};

const ACTION_COLUMNS: &str = "id, type, rule_id, is_then, service_id, delay_id";
const DELAY_COLUMNS: &str = "id, hours, minutes, seconds";

/// Then- and else-branch actions of one rule, each in id order.
pub type RuleActions = (Vec<Action>, Vec<Action>);

#[derive(Clone)]
pub struct ActionRepository {
    db: Database,
}

impl ActionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip_all, fields(tenant = %tenant, rule_id = rule_id))]
    pub async fn add(
        &self,
        tenant: &Tenant,
        rule_id: i64,
        is_then: bool,
        action: &NewAction,
    ) -> Result<Action, StoreError> {
        let session = self.db.session().await?;
        let tx = session.transaction().await?;
        let result = insert_action(&tx, tenant, rule_id, is_then, action).await;
        let action = settle(tx, result).await?;
        info!(action_id = action.id, "action stored");
        Ok(action)
    }

    pub async fn actions_of_rule(
        &self,
        tenant: &Tenant,
        rule_id: i64,
    ) -> Result<RuleActions, StoreError> {
        let session = self.db.session().await?;
        actions_of_rule(&session, tenant, rule_id).await
    }

    /// Remove an action; a delay action takes its delay row with it.
    #[instrument(skip_all, fields(tenant = %tenant, id = id))]
    pub async fn delete(&self, tenant: &Tenant, id: i64) -> Result<(), StoreError> {
        let session = self.db.session().await?;
        let tx = session.transaction().await?;
        let result = remove_action(&tx, tenant, id).await;
        settle(tx, result).await?;
        info!("action deleted");
        Ok(())
    }

    pub async fn exists(&self, tenant: &Tenant, id: i64) -> Result<bool, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                "SELECT 1 FROM actions WHERE tenant = ?1 AND id = ?2",
                params![tenant.as_str(), id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }
}

#[derive(Clone)]
pub struct DelayRepository {
    db: Database,
}

impl DelayRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, tenant: &Tenant, delay: NewDelay) -> Result<Delay, StoreError> {
        let session = self.db.session().await?;
        insert_delay(&session, tenant, delay).await
    }

    pub async fn get(&self, tenant: &Tenant, id: i64) -> Result<Delay, StoreError> {
        let session = self.db.session().await?;
        get_delay(&session, tenant, id).await
    }

    pub async fn update(&self, tenant: &Tenant, id: i64, delay: NewDelay) -> Result<Delay, StoreError> {
        delay.validate()?;
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                &format!(
                    "UPDATE delays SET hours = ?3, minutes = ?4, seconds = ?5
                     WHERE tenant = ?1 AND id = ?2
                     RETURNING {DELAY_COLUMNS}"
                ),
                params![tenant.as_str(), id, delay.hours, delay.minutes, delay.seconds],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_delay(row),
            None => Err(StoreError::not_found("delay", id)),
        }
    }

    pub async fn delete(&self, tenant: &Tenant, id: i64) -> Result<(), StoreError> {
        let session = self.db.session().await?;
        let affected = session
            .execute(
                "DELETE FROM delays WHERE tenant = ?1 AND id = ?2",
                params![tenant.as_str(), id],
            )
            .await?;
        if affected == 0 {
            return Err(StoreError::not_found("delay", id));
        }
        Ok(())
    }

    pub async fn exists(&self, tenant: &Tenant, id: i64) -> Result<bool, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                "SELECT 1 FROM delays WHERE tenant = ?1 AND id = ?2",
                params![tenant.as_str(), id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }
}

pub(crate) async fn insert_action(
    conn: &Connection,
    tenant: &Tenant,
    rule_id: i64,
    is_then: bool,
    action: &NewAction,
) -> Result<Action, StoreError> {
    let (action_type, service_id, delay_id, kind) = match action {
        NewAction::Service { domain } => {
            let service_id = service_id_of(conn, tenant, domain).await?;
            let service = resolve_service(conn, tenant, service_id).await?;
            (
                ActionType::Service,
                Some(service_id),
                None,
                ActionKind::Service { service },
            )
        }
        NewAction::Delay(new_delay) => {
            let delay = insert_delay(conn, tenant, *new_delay).await?;
            (
                ActionType::Delay,
                None,
                Some(delay.id),
                ActionKind::Delay { delay },
            )
        }
    };

    let mut rows = conn
        .query(
            &format!(
                "INSERT INTO actions (id, tenant, type, rule_id, is_then, service_id, delay_id)
                 VALUES ({}, ?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING id",
                next_id_expr(TenantTable::Actions, 1)
            ),
            params![
                tenant.as_str(),
                action_type.as_str(),
                rule_id,
                is_then as i64,
                service_id,
                delay_id
            ],
        )
        .await?;

    let id: i64 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => return Err(StoreError::no_row("actions")),
    };

    Ok(Action {
        id,
        rule_id,
        is_then,
        kind,
    })
}

pub(crate) async fn actions_of_rule(
    conn: &Connection,
    tenant: &Tenant,
    rule_id: i64,
) -> Result<RuleActions, StoreError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {ACTION_COLUMNS} FROM actions
                 WHERE tenant = ?1 AND rule_id = ?2
                 ORDER BY id"
            ),
            params![tenant.as_str(), rule_id],
        )
        .await?;

    let mut stored = Vec::new();
    while let Some(row) = rows.next().await? {
        stored.push(row_to_stored_action(row)?);
    }

    let mut then_actions = Vec::new();
    let mut else_actions = Vec::new();
    for action in stored {
        let kind = match action.action_type {
            ActionType::Service => {
                let service_id = action.service_id.ok_or_else(|| {
                    StoreError::invalid("action", action.id, "service action without service")
                })?;
                ActionKind::Service {
                    service: resolve_service(conn, tenant, service_id).await?,
                }
            }
            ActionType::Delay => {
                let delay_id = action.delay_id.ok_or_else(|| {
                    StoreError::invalid("action", action.id, "delay action without delay")
                })?;
                ActionKind::Delay {
                    delay: get_delay(conn, tenant, delay_id).await?,
                }
            }
        };

        let resolved = Action {
            id: action.id,
            rule_id: action.rule_id,
            is_then: action.is_then,
            kind,
        };
        if resolved.is_then {
            then_actions.push(resolved);
        } else {
            else_actions.push(resolved);
        }
    }

    debug!(
        then = then_actions.len(),
        otherwise = else_actions.len(),
        "loaded rule actions"
    );
    Ok((then_actions, else_actions))
}

pub(crate) async fn remove_action(conn: &Connection, tenant: &Tenant, id: i64) -> Result<(), StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {ACTION_COLUMNS} FROM actions WHERE tenant = ?1 AND id = ?2"),
            params![tenant.as_str(), id],
        )
        .await?;
    let action = match rows.next().await? {
        Some(row) => row_to_stored_action(row)?,
        None => return Err(StoreError::not_found("action", id)),
    };

    if let (ActionType::Delay, Some(delay_id)) = (action.action_type, action.delay_id) {
        conn.execute(
            "DELETE FROM delays WHERE tenant = ?1 AND id = ?2",
            params![tenant.as_str(), delay_id],
        )
        .await?;
    }

    conn.execute(
        "DELETE FROM actions WHERE tenant = ?1 AND id = ?2",
        params![tenant.as_str(), id],
    )
    .await?;
    Ok(())
}

pub(crate) async fn insert_delay(
    conn: &Connection,
    tenant: &Tenant,
    delay: NewDelay,
) -> Result<Delay, StoreError> {
    delay.validate()?;
    let mut rows = conn
        .query(
            &format!(
                "INSERT INTO delays (id, tenant, hours, minutes, seconds)
                 VALUES ({}, ?1, ?2, ?3, ?4)
                 RETURNING {DELAY_COLUMNS}",
                next_id_expr(TenantTable::Delays, 1)
            ),
            params![tenant.as_str(), delay.hours, delay.minutes, delay.seconds],
        )
        .await?;

    match rows.next().await? {
        Some(row) => row_to_delay(row),
        None => Err(StoreError::no_row("delays")),
    }
}

async fn get_delay(conn: &Connection, tenant: &Tenant, id: i64) -> Result<Delay, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {DELAY_COLUMNS} FROM delays WHERE tenant = ?1 AND id = ?2"),
            params![tenant.as_str(), id],
        )
        .await?;

    match rows.next().await? {
        Some(row) => row_to_delay(row),
        None => Err(StoreError::not_found("delay", id)),
    }
}

struct StoredAction {
    id: i64,
    action_type: ActionType,
    rule_id: i64,
    is_then: bool,
    service_id: Option<i64>,
    delay_id: Option<i64>,
}

fn row_to_stored_action(row: Row) -> Result<StoredAction, StoreError> {
    let action_type: String = row.get(1)?;
    let action_type = ActionType::from_str(&action_type).ok_or_else(|| {
        StoreError::UnsupportedType {
            kind: "action",
            value: action_type.clone(),
        }
    })?;
    let is_then: i64 = row.get(3)?;

    Ok(StoredAction {
        id: row.get(0)?,
        action_type,
        rule_id: row.get(2)?,
        is_then: is_then != 0,
        service_id: row.get(4)?,
        delay_id: row.get(5)?,
    })
}

fn row_to_delay(row: Row) -> Result<Delay, StoreError> {
    Ok(Delay {
        id: row.get(0)?,
        hours: row.get(1)?,
        minutes: row.get(2)?,
        seconds: row.get(3)?,
    })
}
