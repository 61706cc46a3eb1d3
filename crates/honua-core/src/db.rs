use std::{env, ops::Deref, path::Path, sync::Arc};

use libsql::{Builder, Connection, Database as LibSqlDatabase, Transaction};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Shared handle to the rule database.
///
/// Every persistence operation goes through [`Database::session`], which holds a
/// process-wide exclusive lock for as long as the returned [`Session`] lives. Id
/// allocation (`MAX(id) + 1`) and the insert that consumes the id therefore never
/// interleave with another writer.
#[derive(Clone)]
pub struct Database {
    inner: Arc<LibSqlDatabase>,
    gate: Arc<Mutex<()>>,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to build database: {0}")]
    Build(libsql::Error),
    #[error("failed to open connection: {0}")]
    Connect(libsql::Error),
    #[error("failed to execute statement: {0}")]
    Statement(libsql::Error),
    #[error("missing required LIBSQL_AUTH_TOKEN for remote database")]
    MissingAuthToken,
    #[error("insert into {0} returned no row")]
    NoRowReturned(&'static str),
}

/// A connection plus the exclusive section it was opened under.
pub struct Session {
    conn: Connection,
    _guard: OwnedMutexGuard<()>,
}

impl Deref for Session {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Database {
    pub async fn new(database_path: &Path) -> Result<Self, DbError> {
        let path_str = database_path.to_string_lossy();
        let inner = if is_remote(&path_str) {
            let auth_token = env::var("LIBSQL_AUTH_TOKEN")
                .ok()
                .filter(|token| !token.is_empty())
                .ok_or(DbError::MissingAuthToken)?;

            Builder::new_remote(path_str.to_string(), auth_token)
                .build()
                .await
        } else {
            Builder::new_local(path_str.to_string()).build().await
        }
        .map_err(DbError::Build)?;

        Ok(Self {
            inner: Arc::new(inner),
            gate: Arc::new(Mutex::new(())),
        })
    }

    /// Open a raw connection with foreign keys enforced. Does not take the
    /// session lock; used by health checks.
    pub async fn connection(&self) -> Result<Connection, DbError> {
        let conn = self.inner.connect().map_err(DbError::Connect)?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(DbError::Statement)?;
        Ok(conn)
    }

    /// Wait for the exclusive section and open a connection inside it.
    pub async fn session(&self) -> Result<Session, DbError> {
        let guard = self.gate.clone().lock_owned().await;
        let conn = self.connection().await?;
        Ok(Session {
            conn,
            _guard: guard,
        })
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query("SELECT 1", ())
            .await
            .map_err(DbError::Statement)?;
        let _ = rows.next().await.map_err(DbError::Statement)?;
        Ok(())
    }
}

/// Commit `tx` when `result` is `Ok`, roll it back otherwise.
pub(crate) async fn settle<T, E>(tx: Transaction, result: Result<T, E>) -> Result<T, E>
where
    E: From<libsql::Error>,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

fn is_remote(path: &str) -> bool {
    path.starts_with("libsql://") || path.starts_with("http://") || path.starts_with("https://")
}
