use libsql::{Connection, Row, params};
use tracing::{debug, info, instrument};

use crate::actions::repository::{actions_of_rule, insert_action};
use crate::conditions::repository::{insert_tree, load_tree, remove_tree};
use crate::db::{Database, settle};
use crate::directory::Entity;
use crate::directory::repositories::{entity_id_of, resolve_entity, row_to_entity};
use crate::error::StoreError;
use crate::ids::{TenantTable, next_id_expr};
use crate::tenant::Tenant;

use super::types::{NewRule, PeriodicTrigger, Rule, Trigger, rule_name};

const RULE_COLUMNS: &str = "id, entity_id, event_based, periodic_trigger, condition_id, enabled";

#[derive(Clone)]
pub struct RuleRepository {
    db: Database,
}

impl RuleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a rule with its condition tree and actions. Nothing is kept if
    /// any part fails.
    #[instrument(skip_all, fields(tenant = %tenant, entity = %new_rule.target))]
    pub async fn add(&self, tenant: &Tenant, new_rule: &NewRule) -> Result<Rule, StoreError> {
        let session = self.db.session().await?;
        let tx = session.transaction().await?;
        let result = async {
            let id = insert_rule(&tx, tenant, new_rule).await?;
            load_rule(&tx, tenant, id).await
        }
        .await;
        let rule = settle(tx, result).await?;
        info!(rule_id = rule.id, condition_id = rule.condition_id, "rule stored");
        Ok(rule)
    }

    /// Replace a rule by deleting it and storing `new_rule` in its place. The
    /// returned rule, its condition tree and its actions all carry new ids.
    #[instrument(skip_all, fields(tenant = %tenant, id = id))]
    pub async fn edit(&self, tenant: &Tenant, id: i64, new_rule: &NewRule) -> Result<Rule, StoreError> {
        let session = self.db.session().await?;
        let tx = session.transaction().await?;
        let result = async {
            remove_rule(&tx, tenant, id).await?;
            let new_id = insert_rule(&tx, tenant, new_rule).await?;
            load_rule(&tx, tenant, new_id).await
        }
        .await;
        let rule = settle(tx, result).await?;
        info!(old_id = id, new_id = rule.id, "rule replaced");
        Ok(rule)
    }

    /// Delete a rule through its condition tree; the rule row and its actions
    /// cascade, delays are purged alongside.
    #[instrument(skip_all, fields(tenant = %tenant, id = id))]
    pub async fn delete(&self, tenant: &Tenant, id: i64) -> Result<(), StoreError> {
        let session = self.db.session().await?;
        let tx = session.transaction().await?;
        let result = remove_rule(&tx, tenant, id).await;
        settle(tx, result).await?;
        info!("rule deleted");
        Ok(())
    }

    pub async fn get(&self, tenant: &Tenant, id: i64) -> Result<Rule, StoreError> {
        let session = self.db.session().await?;
        load_rule(&session, tenant, id).await
    }

    #[instrument(skip_all, fields(tenant = %tenant))]
    pub async fn list(&self, tenant: &Tenant) -> Result<Vec<Rule>, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                "SELECT id FROM rules WHERE tenant = ?1 ORDER BY id",
                params![tenant.as_str()],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: i64 = row.get(0)?;
            ids.push(id);
        }

        let mut rules = Vec::with_capacity(ids.len());
        for id in ids {
            rules.push(load_rule(&session, tenant, id).await?);
        }
        debug!(count = rules.len(), "listed rules");
        Ok(rules)
    }

    pub async fn exists(&self, tenant: &Tenant, id: i64) -> Result<bool, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                "SELECT 1 FROM rules WHERE tenant = ?1 AND id = ?2",
                params![tenant.as_str(), id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Whether the tenant has any rule at all.
    pub async fn any_exist(&self, tenant: &Tenant) -> Result<bool, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                "SELECT 1 FROM rules WHERE tenant = ?1 LIMIT 1",
                params![tenant.as_str()],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Flip a rule on or off without touching its ids.
    pub async fn set_enabled(&self, tenant: &Tenant, id: i64, enabled: bool) -> Result<Rule, StoreError> {
        let session = self.db.session().await?;
        let affected = session
            .execute(
                "UPDATE rules SET enabled = ?3 WHERE tenant = ?1 AND id = ?2",
                params![tenant.as_str(), id, enabled as i64],
            )
            .await?;
        if affected == 0 {
            return Err(StoreError::not_found("rule", id));
        }
        info!(tenant = %tenant, rule_id = id, enabled, "rule toggled");
        load_rule(&session, tenant, id).await
    }

    /// Entities no rule targets yet.
    pub async fn entities_without_rule(&self, tenant: &Tenant) -> Result<Vec<Entity>, StoreError> {
        let session = self.db.session().await?;
        let mut rows = session
            .query(
                "SELECT id, tenant, entity_id, name, is_device, allow_rules, has_numeric_state, attribute
                 FROM entities
                 WHERE tenant = ?1
                   AND id NOT IN (SELECT entity_id FROM rules WHERE tenant = ?1)
                 ORDER BY id",
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

async fn insert_rule(conn: &Connection, tenant: &Tenant, new_rule: &NewRule) -> Result<i64, StoreError> {
    let target_id = entity_id_of(conn, tenant, &new_rule.target).await?;
    let condition_id = insert_tree(conn, tenant, &new_rule.condition).await?;

    let mut rows = conn
        .query(
            &format!(
                "INSERT INTO rules (id, tenant, entity_id, event_based, periodic_trigger, condition_id, enabled)
                 VALUES ({}, ?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING id",
                next_id_expr(TenantTable::Rules, 1)
            ),
            params![
                tenant.as_str(),
                target_id,
                new_rule.trigger.is_event_based() as i64,
                new_rule.trigger.periodic().map(|period| period.as_str()),
                condition_id,
                new_rule.enabled as i64
            ],
        )
        .await?;
    let id: i64 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => return Err(StoreError::no_row("rules")),
    };

    for action in &new_rule.then_actions {
        insert_action(conn, tenant, id, true, action).await?;
    }
    for action in &new_rule.else_actions {
        insert_action(conn, tenant, id, false, action).await?;
    }

    debug!(
        rule_id = id,
        condition_id,
        then = new_rule.then_actions.len(),
        otherwise = new_rule.else_actions.len(),
        "inserted rule"
    );
    Ok(id)
}

async fn remove_rule(conn: &Connection, tenant: &Tenant, id: i64) -> Result<(), StoreError> {
    let mut rows = conn
        .query(
            "SELECT condition_id FROM rules WHERE tenant = ?1 AND id = ?2",
            params![tenant.as_str(), id],
        )
        .await?;
    let condition_id: i64 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => return Err(StoreError::not_found("rule", id)),
    };
    remove_tree(conn, tenant, condition_id).await
}

async fn load_rule(conn: &Connection, tenant: &Tenant, id: i64) -> Result<Rule, StoreError> {
    let mut rows = conn
        .query(
            &format!("SELECT {RULE_COLUMNS} FROM rules WHERE tenant = ?1 AND id = ?2"),
            params![tenant.as_str(), id],
        )
        .await?;
    let stored = match rows.next().await? {
        Some(row) => row_to_stored_rule(row)?,
        None => return Err(StoreError::not_found("rule", id)),
    };

    let target = resolve_entity(conn, tenant, stored.entity_id).await?;
    let condition = load_tree(conn, tenant, stored.condition_id).await?;
    let (then_actions, else_actions) = actions_of_rule(conn, tenant, id).await?;

    Ok(Rule {
        id,
        tenant: tenant.clone(),
        name: rule_name(&target),
        enabled: stored.enabled,
        target,
        trigger: stored.trigger,
        condition_id: stored.condition_id,
        condition,
        then_actions,
        else_actions,
    })
}

struct StoredRule {
    entity_id: i64,
    trigger: Trigger,
    condition_id: i64,
    enabled: bool,
}

fn row_to_stored_rule(row: Row) -> Result<StoredRule, StoreError> {
    let id: i64 = row.get(0)?;
    let event_based: i64 = row.get(2)?;
    let periodic: Option<String> = row.get(3)?;
    let enabled: i64 = row.get(5)?;

    let trigger = if event_based != 0 {
        Trigger::Event
    } else {
        let value =
            periodic.ok_or_else(|| StoreError::invalid("rule", id, "periodic rule without interval"))?;
        let period = PeriodicTrigger::from_str(&value).ok_or_else(|| StoreError::UnsupportedType {
            kind: "periodic trigger",
            value: value.clone(),
        })?;
        Trigger::Periodic(period)
    };

    Ok(StoredRule {
        entity_id: row.get(1)?,
        trigger,
        condition_id: row.get(4)?,
        enabled: enabled != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionKind, NewAction, NewDelay};
    use crate::conditions::{Condition, ConditionRepository, LogicalOperator, Predicate};
    use crate::directory::{
        EntityRepository, HassServiceRepository, IdentityRepository, NewEntity, NewHassService,
    };
    use crate::migrations::run_migrations;
    use tempfile::TempDir;

    async fn setup_db() -> (Database, TempDir, Tenant) {
        let dir = TempDir::new().expect("temp dir");
        let db_name = format!("db_{}.sqlite", uuid::Uuid::new_v4());
        let db = Database::new(&dir.path().join(db_name))
            .await
            .expect("create db");
        run_migrations(&db).await.expect("migrations");

        let tenant = Tenant::new("t1").expect("tenant");
        IdentityRepository::new(db.clone())
            .create(&tenant, "Home")
            .await
            .expect("identity");
        let entities = EntityRepository::new(db.clone());
        for (key, name) in [
            ("light.kitchen", "Kitchen light"),
            ("sensor.temperature", "Temperature"),
            ("switch.heater", "Heater"),
        ] {
            entities
                .create(
                    &tenant,
                    NewEntity {
                        entity_id: key.into(),
                        name: name.into(),
                        is_device: true,
                        allow_rules: true,
                        has_numeric_state: key.starts_with("sensor."),
                        attribute: None,
                    },
                )
                .await
                .expect("entity");
        }
        HassServiceRepository::new(db.clone())
            .create(
                &tenant,
                NewHassService {
                    domain: "light.turn_on".into(),
                    name: "Turn on".into(),
                },
            )
            .await
            .expect("service");
        (db, dir, tenant)
    }

    fn sample_rule() -> NewRule {
        NewRule {
            target: "light.kitchen".into(),
            enabled: true,
            trigger: Trigger::Periodic(PeriodicTrigger::FiveMinutes),
            condition: Condition::logical(
                LogicalOperator::Or,
                vec![
                    Condition::leaf(Predicate::NumericState {
                        sensor: "sensor.temperature".into(),
                        above: None,
                        below: Some(18),
                    }),
                    Condition::leaf(Predicate::Time {
                        after: Some("22:00".into()),
                        before: None,
                    }),
                ],
            ),
            then_actions: vec![NewAction::Service {
                domain: "light.turn_on".into(),
            }],
            else_actions: vec![NewAction::Delay(NewDelay::new(0, 10, 0))],
        }
    }

    #[tokio::test]
    async fn add_get_and_list() {
        let (db, _dir, tenant) = setup_db().await;
        let repo = RuleRepository::new(db);

        let created = repo.add(&tenant, &sample_rule()).await.expect("add");
        assert_eq!(created.id, 0);
        assert_eq!(created.name, "Kitchen light rule");
        assert_eq!(created.target.entity_id, "light.kitchen");
        assert_eq!(created.trigger, Trigger::Periodic(PeriodicTrigger::FiveMinutes));
        assert_eq!(created.to_new(), sample_rule());

        let fetched = repo.get(&tenant, created.id).await.expect("get");
        assert_eq!(fetched, created);
        assert_eq!(repo.list(&tenant).await.expect("list"), vec![created]);
        assert!(repo.any_exist(&tenant).await.expect("any"));
    }

    #[tokio::test]
    async fn unknown_target_is_not_found_and_leaves_nothing() {
        let (db, _dir, tenant) = setup_db().await;
        let repo = RuleRepository::new(db.clone());
        let mut rule = sample_rule();
        rule.target = "light.missing".into();

        let err = repo.add(&tenant, &rule).await.expect_err("unknown target");
        assert!(matches!(err, StoreError::NotFound { kind: "entity", .. }));
        assert!(!repo.any_exist(&tenant).await.expect("any"));
        assert!(!ConditionRepository::new(db).exists(&tenant, 0).await.expect("exists"));
    }

    #[tokio::test]
    async fn edit_replaces_rule_with_new_ids() {
        let (db, _dir, tenant) = setup_db().await;
        let repo = RuleRepository::new(db);
        let created = repo.add(&tenant, &sample_rule()).await.expect("add");
        let other = repo.add(&tenant, &sample_rule()).await.expect("add other");

        let mut changed = sample_rule();
        changed.trigger = Trigger::Event;
        changed.target = "switch.heater".into();
        changed.else_actions.clear();
        let edited = repo.edit(&tenant, created.id, &changed).await.expect("edit");

        assert_eq!(edited.id, other.id + 1);
        assert_ne!(edited.condition_id, created.condition_id);
        assert_eq!(edited.to_new(), changed);
        assert!(!repo.exists(&tenant, created.id).await.expect("old gone"));
        assert_eq!(repo.list(&tenant).await.expect("list").len(), 2);
        assert_eq!(repo.get(&tenant, other.id).await.expect("other"), other);

        assert!(matches!(
            repo.edit(&tenant, 99, &changed).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failed_edit_keeps_the_old_rule() {
        let (db, _dir, tenant) = setup_db().await;
        let repo = RuleRepository::new(db);
        let created = repo.add(&tenant, &sample_rule()).await.expect("add");

        let mut broken = sample_rule();
        broken.then_actions = vec![NewAction::Service {
            domain: "switch.unknown".into(),
        }];
        let err = repo
            .edit(&tenant, created.id, &broken)
            .await
            .expect_err("unknown service");
        assert!(matches!(err, StoreError::NotFound { .. }));

        assert_eq!(repo.get(&tenant, created.id).await.expect("get"), created);
    }

    #[tokio::test]
    async fn delete_cascades_to_conditions_actions_and_delays() {
        let (db, _dir, tenant) = setup_db().await;
        let repo = RuleRepository::new(db.clone());
        let created = repo.add(&tenant, &sample_rule()).await.expect("add");
        let delay_id = match &created.else_actions[0].kind {
            ActionKind::Delay { delay } => delay.id,
            other => panic!("unexpected kind {other:?}"),
        };

        repo.delete(&tenant, created.id).await.expect("delete");

        assert!(!repo.exists(&tenant, created.id).await.expect("exists"));
        let conn = db.connection().await.expect("connection");
        for (table, sql) in [
            ("conditions", "SELECT COUNT(*) FROM conditions WHERE tenant = 't1'"),
            ("actions", "SELECT COUNT(*) FROM actions WHERE tenant = 't1'"),
            ("delays", "SELECT COUNT(*) FROM delays WHERE tenant = 't1'"),
        ] {
            let mut rows = conn.query(sql, ()).await.expect("count");
            let count: i64 = rows
                .next()
                .await
                .expect("row")
                .expect("row value")
                .get(0)
                .expect("count");
            assert_eq!(count, 0, "{table} should be empty (delay {delay_id})");
        }
        assert!(matches!(
            repo.delete(&tenant, created.id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn set_enabled_keeps_ids() {
        let (db, _dir, tenant) = setup_db().await;
        let repo = RuleRepository::new(db);
        let created = repo.add(&tenant, &sample_rule()).await.expect("add");

        let disabled = repo
            .set_enabled(&tenant, created.id, false)
            .await
            .expect("disable");
        assert!(!disabled.enabled);
        assert_eq!(disabled.id, created.id);
        assert_eq!(disabled.condition_id, created.condition_id);

        assert!(matches!(
            repo.set_enabled(&tenant, 42, true).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn entities_without_rule_excludes_targets() {
        let (db, _dir, tenant) = setup_db().await;
        let repo = RuleRepository::new(db);

        let all: Vec<String> = repo
            .entities_without_rule(&tenant)
            .await
            .expect("no rules yet")
            .into_iter()
            .map(|entity| entity.entity_id)
            .collect();
        assert_eq!(all, vec!["light.kitchen", "sensor.temperature", "switch.heater"]);

        repo.add(&tenant, &sample_rule()).await.expect("add");
        let remaining: Vec<String> = repo
            .entities_without_rule(&tenant)
            .await
            .expect("after rule")
            .into_iter()
            .map(|entity| entity.entity_id)
            .collect();
        assert_eq!(remaining, vec!["sensor.temperature", "switch.heater"]);
    }

    #[tokio::test]
    async fn deleting_the_root_condition_removes_the_rule() {
        let (db, _dir, tenant) = setup_db().await;
        let repo = RuleRepository::new(db.clone());
        let created = repo.add(&tenant, &sample_rule()).await.expect("add");

        ConditionRepository::new(db)
            .delete_tree(&tenant, created.condition_id)
            .await
            .expect("delete tree");

        assert!(!repo.exists(&tenant, created.id).await.expect("exists"));
    }
}
