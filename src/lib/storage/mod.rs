pub mod postgres;
pub mod session;
pub mod sqlite;

pub use session::Session;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;

use crate::core::{Title, Todo, TodoError, TodoPatch, ValidPatch};

/// Persistence for the `todos` table.
///
/// Every mutating call runs inside one [`Session`] and commits before
/// returning; an error on any path drops the session, which rolls it back.
/// Backends provide the statements; `update_todo` orders them.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Creates the table if it does not exist yet. Succeeds at most once per
    /// process; later calls return immediately.
    async fn ensure_schema(&self) -> Result<(), TodoError>;
    /// One trivial round trip, used by the health check.
    async fn ping(&self) -> Result<(), TodoError>;
    async fn list_todos(&self) -> Result<Vec<Todo>, TodoError>;
    async fn create_todo(&self, title: Title) -> Result<Todo, TodoError>;
    /// Single-row read outside any transaction.
    async fn find_todo(&self, id: i64) -> Result<Option<Todo>, TodoError>;
    /// Writes only the supplied columns in one `UPDATE ... RETURNING`
    /// statement. `None` when no row has that id.
    async fn apply_patch(&self, id: i64, patch: ValidPatch) -> Result<Option<Todo>, TodoError>;

    /// Partial update. An unknown id is reported before an invalid title;
    /// a valid patch touches the row with a single statement, so concurrent
    /// updates to different fields both land and same-field updates are
    /// last-commit-wins.
    async fn update_todo(&self, id: i64, patch: TodoPatch) -> Result<Todo, TodoError> {
        let patch = match patch.validate() {
            Ok(patch) => patch,
            Err(e) => {
                return match self.find_todo(id).await? {
                    Some(_) => Err(e),
                    None => Err(TodoError::NotFound),
                };
            }
        };
        let todo = if patch.is_empty() {
            self.find_todo(id).await?
        } else {
            self.apply_patch(id, patch).await?
        };
        todo.ok_or(TodoError::NotFound)
    }

    async fn delete_todo(&self, id: i64) -> Result<(), TodoError>;
    async fn close(&self);
}

/// Picks a backend from the URL scheme. The pool connects lazily, so an
/// unreachable store only shows up on first use.
pub fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = if database_url.starts_with("sqlite:") {
        Arc::new(sqlite::SqliteStorage::connect(database_url, max_connections)?)
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Arc::new(postgres::PostgresStorage::connect(database_url, max_connections)?)
    } else {
        bail!("unsupported DATABASE_URL scheme, expected sqlite: or postgres://");
    };
    Ok(storage)
}
