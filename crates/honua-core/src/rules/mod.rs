pub mod repositories;
pub mod types;

pub use repositories::RuleRepository;
pub use types::{NewRule, PeriodicTrigger, Rule, Trigger};
