pub mod repository;
pub mod types;

pub use repository::{ActionRepository, DelayRepository, RuleActions};
pub use types::{Action, ActionKind, ActionType, Delay, NewAction, NewDelay};
