//! Conversion between the in-memory condition tree and flat `conditions` rows.
//! Nothing here touches the database.

use std::collections::HashMap;

use crate::error::StoreError;

use super::types::{Condition, ConditionType, LeafCondition, LogicalCondition, LogicalOperator, Predicate};

/// One node of a tree in pre-order. `parent` indexes into the same vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatNode<'a> {
    pub parent: Option<usize>,
    pub condition_type: ConditionType,
    pub predicate: Option<&'a Predicate>,
}

/// Pre-order walk: every parent precedes its children, and siblings keep
/// their order.
pub fn flatten(root: &Condition) -> Vec<FlatNode<'_>> {
    let mut nodes = Vec::new();
    let mut stack: Vec<(&Condition, Option<usize>)> = vec![(root, None)];

    while let Some((node, parent)) = stack.pop() {
        let index = nodes.len();
        match node {
            Condition::Logical(logical) => {
                nodes.push(FlatNode {
                    parent,
                    condition_type: logical.op.condition_type(),
                    predicate: None,
                });
                for child in logical.children.iter().rev() {
                    stack.push((child, Some(index)));
                }
            }
            Condition::Leaf(leaf) => nodes.push(FlatNode {
                parent,
                condition_type: leaf.predicate.condition_type(),
                predicate: Some(&leaf.predicate),
            }),
        }
    }

    nodes
}

/// Leaf columns of a `conditions` row, sensor still as an entity key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafColumns<'a> {
    pub sensor: Option<&'a str>,
    pub before: Option<&'a str>,
    pub after: Option<&'a str>,
    pub below: Option<i64>,
    pub above: Option<i64>,
    pub comparison_state: Option<&'a str>,
}

/// Columns to write for a node; composite nodes leave every leaf column empty.
pub fn leaf_columns(predicate: Option<&Predicate>) -> LeafColumns<'_> {
    match predicate {
        None => LeafColumns::default(),
        Some(Predicate::NumericState {
            sensor,
            above,
            below,
        }) => LeafColumns {
            sensor: Some(sensor),
            below: *below,
            above: *above,
            ..LeafColumns::default()
        },
        Some(Predicate::State { sensor, state }) => LeafColumns {
            sensor: Some(sensor),
            comparison_state: Some(state),
            ..LeafColumns::default()
        },
        Some(Predicate::Time { after, before }) => LeafColumns {
            before: before.as_deref(),
            after: after.as_deref(),
            ..LeafColumns::default()
        },
    }
}

/// A stored `conditions` row.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionRow {
    pub id: i64,
    pub condition_type: ConditionType,
    pub sensor_id: Option<i64>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub below: Option<i64>,
    pub above: Option<i64>,
    pub comparison_state: Option<String>,
    pub parent_id: Option<i64>,
}

/// Rebuild the tree rooted at `root_id` from its rows. Children are ordered
/// by id; `sensors` maps entity ids to entity keys. Columns that do not belong
/// to a row's type are ignored.
pub fn assemble(
    root_id: i64,
    rows: &[ConditionRow],
    sensors: &HashMap<i64, String>,
) -> Result<Condition, StoreError> {
    let mut by_id: HashMap<i64, &ConditionRow> = HashMap::with_capacity(rows.len());
    let mut children: HashMap<i64, Vec<&ConditionRow>> = HashMap::new();
    for row in rows {
        by_id.insert(row.id, row);
        if let Some(parent) = row.parent_id {
            children.entry(parent).or_default().push(row);
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|row| row.id);
    }

    let root = by_id
        .get(&root_id)
        .copied()
        .ok_or_else(|| StoreError::not_found("condition", root_id))?;
    build(root, &children, sensors)
}

fn build(
    row: &ConditionRow,
    children: &HashMap<i64, Vec<&ConditionRow>>,
    sensors: &HashMap<i64, String>,
) -> Result<Condition, StoreError> {
    if let Some(op) = LogicalOperator::from_type(row.condition_type) {
        let kids = match children.get(&row.id) {
            Some(kids) => kids
                .iter()
                .map(|child| build(child, children, sensors))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        return Ok(Condition::Logical(LogicalCondition {
            id: Some(row.id),
            op,
            children: kids,
        }));
    }

    let predicate = row_predicate(row, sensors)?;
    predicate.validate(&row.id.to_string())?;
    Ok(Condition::Leaf(LeafCondition {
        id: Some(row.id),
        predicate,
    }))
}

fn row_predicate(row: &ConditionRow, sensors: &HashMap<i64, String>) -> Result<Predicate, StoreError> {
    let sensor = || -> Result<String, StoreError> {
        let sensor_id = row
            .sensor_id
            .ok_or_else(|| StoreError::invalid("condition", row.id, "missing sensor"))?;
        sensors
            .get(&sensor_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("entity", sensor_id))
    };

    match row.condition_type {
        ConditionType::NumericState => Ok(Predicate::NumericState {
            sensor: sensor()?,
            above: row.above,
            below: row.below,
        }),
        ConditionType::State => Ok(Predicate::State {
            sensor: sensor()?,
            state: row.comparison_state.clone().unwrap_or_default(),
        }),
        ConditionType::Time => Ok(Predicate::Time {
            after: row.after.clone(),
            before: row.before.clone(),
        }),
        composite => Err(StoreError::invalid(
            "condition",
            row.id,
            format!("{} is not a leaf type", composite.as_str()),
        )),
    }
}
