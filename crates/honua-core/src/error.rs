use thiserror::Error;

use crate::db::DbError;

/// Errors surfaced by the rule, condition, action and directory stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid {kind} {id}: {reason}")]
    InvalidState {
        kind: &'static str,
        id: String,
        reason: String,
    },
    #[error("invalid transition for condition {id}: {reason}")]
    InvalidTransition { id: i64, reason: String },
    #[error("unsupported {kind} type {value}")]
    UnsupportedType { kind: &'static str, value: String },
    #[error("tenant id must not be empty")]
    InvalidTenant,
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// An `INSERT ... RETURNING` that produced nothing.
    pub(crate) fn no_row(table: &'static str) -> Self {
        Self::Database(DbError::NoRowReturned(table))
    }

    pub(crate) fn invalid(kind: &'static str, id: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            kind,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transition(id: i64, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            id,
            reason: reason.into(),
        }
    }

    /// True for failures of the database itself rather than of the request.
    pub fn is_underlying(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Sql(_))
    }
}
