use serde::{Deserialize, Serialize};

use crate::directory::HassService;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Service,
    Delay,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Service => "SERVICE",
            ActionType::Delay => "DELAY",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "SERVICE" => Some(Self::Service),
            "DELAY" => Some(Self::Delay),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDelay {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl NewDelay {
    pub fn new(hours: i64, minutes: i64, seconds: i64) -> Self {
        Self {
            hours,
            minutes,
            seconds,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.hours < 0 || self.minutes < 0 || self.seconds < 0 {
            return Err(StoreError::invalid(
                "delay",
                "new",
                "hours, minutes and seconds must not be negative",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delay {
    pub id: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Delay {
    pub fn to_new(&self) -> NewDelay {
        NewDelay::new(self.hours, self.minutes, self.seconds)
    }
}

/// An action as supplied by a caller: a service named by domain, or a delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NewAction {
    Service { domain: String },
    Delay(NewDelay),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Service { service: HassService },
    Delay { delay: Delay },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub rule_id: i64,
    pub is_then: bool,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn action_type(&self) -> ActionType {
        match self.kind {
            ActionKind::Service { .. } => ActionType::Service,
            ActionKind::Delay { .. } => ActionType::Delay,
        }
    }

    /// The input that would recreate this action.
    pub fn to_new(&self) -> NewAction {
        match &self.kind {
            ActionKind::Service { service } => NewAction::Service {
                domain: service.domain.clone(),
            },
            ActionKind::Delay { delay } => NewAction::Delay(delay.to_new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_actions_parse_from_tagged_json() {
        let service: NewAction =
            serde_json::from_value(json!({"type": "service", "domain": "light.turn_on"}))
                .expect("service");
        assert_eq!(
            service,
            NewAction::Service {
                domain: "light.turn_on".into()
            }
        );

        let delay: NewAction = serde_json::from_value(
            json!({"type": "delay", "hours": 1, "minutes": 1, "seconds": 1}),
        )
        .expect("delay");
        assert_eq!(delay, NewAction::Delay(NewDelay::new(1, 1, 1)));
    }

    #[test]
    fn negative_delay_is_invalid() {
        assert!(NewDelay::new(0, -1, 0).validate().is_err());
        NewDelay::new(0, 0, 0).validate().expect("zero delay is fine");
    }
}
