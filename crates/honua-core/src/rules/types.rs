use serde::{Deserialize, Serialize};

use crate::actions::{Action, NewAction};
use crate::conditions::Condition;
use crate::directory::Entity;
use crate::tenant::Tenant;

/// Evaluation interval of a rule that is not event driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodicTrigger {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "2m")]
    TwoMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "10m")]
    TenMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "20m")]
    TwentyMinutes,
    #[serde(rename = "25m")]
    TwentyFiveMinutes,
    #[serde(rename = "45m")]
    FortyFiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "6h")]
    SixHours,
}

impl PeriodicTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodicTrigger::OneMinute => "1m",
            PeriodicTrigger::TwoMinutes => "2m",
            PeriodicTrigger::FiveMinutes => "5m",
            PeriodicTrigger::TenMinutes => "10m",
            PeriodicTrigger::FifteenMinutes => "15m",
            PeriodicTrigger::TwentyMinutes => "20m",
            PeriodicTrigger::TwentyFiveMinutes => "25m",
            PeriodicTrigger::FortyFiveMinutes => "45m",
            PeriodicTrigger::OneHour => "1h",
            PeriodicTrigger::TwoHours => "2h",
            PeriodicTrigger::SixHours => "6h",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "1m" => Some(Self::OneMinute),
            "2m" => Some(Self::TwoMinutes),
            "5m" => Some(Self::FiveMinutes),
            "10m" => Some(Self::TenMinutes),
            "15m" => Some(Self::FifteenMinutes),
            "20m" => Some(Self::TwentyMinutes),
            "25m" => Some(Self::TwentyFiveMinutes),
            "45m" => Some(Self::FortyFiveMinutes),
            "1h" => Some(Self::OneHour),
            "2h" => Some(Self::TwoHours),
            "6h" => Some(Self::SixHours),
            _ => None,
        }
    }

    pub fn minutes(&self) -> u32 {
        match self {
            PeriodicTrigger::OneMinute => 1,
            PeriodicTrigger::TwoMinutes => 2,
            PeriodicTrigger::FiveMinutes => 5,
            PeriodicTrigger::TenMinutes => 10,
            PeriodicTrigger::FifteenMinutes => 15,
            PeriodicTrigger::TwentyMinutes => 20,
            PeriodicTrigger::TwentyFiveMinutes => 25,
            PeriodicTrigger::FortyFiveMinutes => 45,
            PeriodicTrigger::OneHour => 60,
            PeriodicTrigger::TwoHours => 120,
            PeriodicTrigger::SixHours => 360,
        }
    }
}

/// When a rule is evaluated: on every state change of its inputs, or on a
/// fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "every", rename_all = "snake_case")]
pub enum Trigger {
    Event,
    Periodic(PeriodicTrigger),
}

impl Trigger {
    pub fn is_event_based(&self) -> bool {
        matches!(self, Trigger::Event)
    }

    pub fn periodic(&self) -> Option<PeriodicTrigger> {
        match self {
            Trigger::Event => None,
            Trigger::Periodic(period) => Some(*period),
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    /// Entity key of the rule's target, e.g. `light.kitchen`.
    pub target: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub trigger: Trigger,
    pub condition: Condition,
    #[serde(default)]
    pub then_actions: Vec<NewAction>,
    #[serde(default)]
    pub else_actions: Vec<NewAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub tenant: Tenant,
    pub name: String,
    pub enabled: bool,
    pub target: Entity,
    pub trigger: Trigger,
    pub condition_id: i64,
    pub condition: Condition,
    pub then_actions: Vec<Action>,
    pub else_actions: Vec<Action>,
}

impl Rule {
    /// The input that recreates this rule, ids dropped.
    pub fn to_new(&self) -> NewRule {
        NewRule {
            target: self.target.entity_id.clone(),
            enabled: self.enabled,
            trigger: self.trigger,
            condition: self.condition.without_ids(),
            then_actions: self.then_actions.iter().map(Action::to_new).collect(),
            else_actions: self.else_actions.iter().map(Action::to_new).collect(),
        }
    }
}

pub(crate) fn rule_name(target: &Entity) -> String {
    format!("{} rule", target.name)
}
