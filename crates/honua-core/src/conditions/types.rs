use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Stored discriminator of a condition row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    And,
    Or,
    Nand,
    Nor,
    #[serde(rename = "NUMERICSTATE")]
    NumericState,
    State,
    Time,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::And => "AND",
            ConditionType::Or => "OR",
            ConditionType::Nand => "NAND",
            ConditionType::Nor => "NOR",
            ConditionType::NumericState => "NUMERICSTATE",
            ConditionType::State => "STATE",
            ConditionType::Time => "TIME",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            "NAND" => Some(Self::Nand),
            "NOR" => Some(Self::Nor),
            "NUMERICSTATE" => Some(Self::NumericState),
            "STATE" => Some(Self::State),
            "TIME" => Some(Self::Time),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Nand | Self::Nor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "OR")]
    Or,
    #[serde(alias = "NAND")]
    Nand,
    #[serde(alias = "NOR")]
    Nor,
}

impl LogicalOperator {
    pub fn condition_type(&self) -> ConditionType {
        match self {
            LogicalOperator::And => ConditionType::And,
            LogicalOperator::Or => ConditionType::Or,
            LogicalOperator::Nand => ConditionType::Nand,
            LogicalOperator::Nor => ConditionType::Nor,
        }
    }

    pub fn from_type(ty: ConditionType) -> Option<Self> {
        match ty {
            ConditionType::And => Some(Self::And),
            ConditionType::Or => Some(Self::Or),
            ConditionType::Nand => Some(Self::Nand),
            ConditionType::Nor => Some(Self::Nor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub op: LogicalOperator,
    #[serde(default)]
    pub children: Vec<Condition>,
}

/// Terminal predicate. `sensor` is the entity key (`sensor.temperature`),
/// not the numeric entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    NumericState {
        sensor: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below: Option<i64>,
    },
    State {
        sensor: String,
        state: String,
    },
    Time {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<String>,
    },
}

impl Predicate {
    pub fn condition_type(&self) -> ConditionType {
        match self {
            Predicate::NumericState { .. } => ConditionType::NumericState,
            Predicate::State { .. } => ConditionType::State,
            Predicate::Time { .. } => ConditionType::Time,
        }
    }

    pub fn sensor(&self) -> Option<&str> {
        match self {
            Predicate::NumericState { sensor, .. } | Predicate::State { sensor, .. } => {
                Some(sensor.as_str())
            }
            Predicate::Time { .. } => None,
        }
    }

    /// Check the required fields of the predicate. `id` only labels the error.
    pub fn validate(&self, id: &str) -> Result<(), StoreError> {
        match self {
            Predicate::NumericState {
                sensor,
                above,
                below,
            } => {
                if sensor.trim().is_empty() {
                    return Err(StoreError::invalid("condition", id, "NUMERICSTATE requires a sensor"));
                }
                if above.is_none() && below.is_none() {
                    return Err(StoreError::invalid(
                        "condition",
                        id,
                        "NUMERICSTATE requires above or below",
                    ));
                }
            }
            Predicate::State { sensor, state } => {
                if sensor.trim().is_empty() {
                    return Err(StoreError::invalid("condition", id, "STATE requires a sensor"));
                }
                if state.is_empty() {
                    return Err(StoreError::invalid(
                        "condition",
                        id,
                        "STATE requires a comparison state",
                    ));
                }
            }
            Predicate::Time { after, before } => {
                if after.is_none() && before.is_none() {
                    return Err(StoreError::invalid("condition", id, "TIME requires after or before"));
                }
                for value in [after, before].into_iter().flatten() {
                    if parse_time(value).is_none() {
                        return Err(StoreError::invalid(
                            "condition",
                            id,
                            format!("invalid time of day {value:?}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub predicate: Predicate,
}

/// A boolean expression tree over sensor and time predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Logical(LogicalCondition),
    Leaf(LeafCondition),
}

impl Condition {
    pub fn logical(op: LogicalOperator, children: Vec<Condition>) -> Self {
        Condition::Logical(LogicalCondition {
            id: None,
            op,
            children,
        })
    }

    pub fn leaf(predicate: Predicate) -> Self {
        Condition::Leaf(LeafCondition {
            id: None,
            predicate,
        })
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            Condition::Logical(logical) => logical.id,
            Condition::Leaf(leaf) => leaf.id,
        }
    }

    pub fn condition_type(&self) -> ConditionType {
        match self {
            Condition::Logical(logical) => logical.op.condition_type(),
            Condition::Leaf(leaf) => leaf.predicate.condition_type(),
        }
    }

    /// Validate every leaf in the tree.
    pub fn validate(&self) -> Result<(), StoreError> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Condition::Logical(logical) => stack.extend(logical.children.iter()),
                Condition::Leaf(leaf) => {
                    let label = leaf.id.map(|id| id.to_string()).unwrap_or_else(|| "new".into());
                    leaf.predicate.validate(&label)?;
                }
            }
        }
        Ok(())
    }

    /// The same tree with every id cleared.
    pub fn without_ids(&self) -> Condition {
        match self {
            Condition::Logical(logical) => Condition::Logical(LogicalCondition {
                id: None,
                op: logical.op,
                children: logical.children.iter().map(Condition::without_ids).collect(),
            }),
            Condition::Leaf(leaf) => Condition::Leaf(LeafCondition {
                id: None,
                predicate: leaf.predicate.clone(),
            }),
        }
    }
}
