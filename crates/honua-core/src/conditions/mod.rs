//! Condition trees stored as an adjacency list in the `conditions` table.

pub mod mapping;
pub mod repository;
pub mod types;

pub use repository::ConditionRepository;
pub use types::{
    Condition, ConditionType, LeafCondition, LogicalCondition, LogicalOperator, Predicate,
};
