pub mod actions;
pub mod conditions;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod ids;
pub mod migrations;
pub mod rules;
pub mod telemetry;
pub mod tenant;

pub use actions::{Action, ActionKind, ActionRepository, Delay, DelayRepository, NewAction, NewDelay};
pub use conditions::{Condition, ConditionRepository, LogicalOperator, Predicate};
pub use config::Config;
pub use db::Database;
pub use directory::{
    Entity, EntityRepository, HassService, HassServiceRepository, Identity, IdentityRepository,
    NewEntity, NewHassService,
};
pub use error::StoreError;
pub use ids::{IdAllocator, TenantTable};
pub use migrations::run_migrations;
pub use rules::{NewRule, PeriodicTrigger, Rule, RuleRepository, Trigger};
pub use telemetry::{TelemetryError, init_telemetry};
pub use tenant::Tenant;
