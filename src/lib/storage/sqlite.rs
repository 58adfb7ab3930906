use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{
    Row, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
};
use tokio::sync::OnceCell;

use crate::core::{Title, Todo, TodoError, ValidPatch};
use crate::storage::{Session, Storage};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS todos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title VARCHAR(255) NOT NULL,
    completed BOOLEAN NOT NULL DEFAULT 0,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStorage {
    pool: SqlitePool,
    schema: OnceCell<()>,
}

impl SqliteStorage {
    /// In-memory databases live only as long as their connection, so they
    /// get a single connection that is never recycled. Writers queue on the
    /// database lock for up to `BUSY_TIMEOUT` before failing.
    pub fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };
        Ok(Self {
            pool: pool.connect_lazy_with(options),
            schema: OnceCell::new(),
        })
    }

    async fn begin(&self) -> Result<Session<Sqlite>, TodoError> {
        self.ensure_schema().await?;
        Ok(Session::begin(&self.pool).await?)
    }
}

fn todo_from_row(row: &SqliteRow) -> Result<Todo, sqlx::Error> {
    let created_at: NaiveDateTime = row.try_get("created_at")?;
    Ok(Todo {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        completed: row.try_get("completed")?,
        created_at: created_at.and_utc(),
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn ensure_schema(&self) -> Result<(), TodoError> {
        self.schema
            .get_or_try_init(|| async {
                sqlx::query(SCHEMA).execute(&self.pool).await?;
                tracing::info!("todos table ready");
                Ok::<(), TodoError>(())
            })
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), TodoError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_todos(&self) -> Result<Vec<Todo>, TodoError> {
        let mut session = self.begin().await?;
        let rows = sqlx::query("SELECT id, title, completed, created_at FROM todos ORDER BY id")
            .fetch_all(session.conn())
            .await?;
        let todos = rows.iter().map(todo_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(todos)
    }

    async fn create_todo(&self, title: Title) -> Result<Todo, TodoError> {
        let mut session = self.begin().await?;
        let row = sqlx::query(
            "INSERT INTO todos (title, completed) VALUES (?, 0)
             RETURNING id, title, completed, created_at",
        )
        .bind(title.as_str())
        .fetch_one(session.conn())
        .await?;
        let todo = todo_from_row(&row)?;
        session.commit().await?;
        tracing::debug!(id = todo.id, "inserted todo");
        Ok(todo)
    }

    async fn find_todo(&self, id: i64) -> Result<Option<Todo>, TodoError> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT id, title, completed, created_at FROM todos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(todo_from_row).transpose()?)
    }

    async fn apply_patch(&self, id: i64, patch: ValidPatch) -> Result<Option<Todo>, TodoError> {
        let mut session = self.begin().await?;
        let row = sqlx::query(
            "UPDATE todos SET title = COALESCE(?, title), completed = COALESCE(?, completed)
             WHERE id = ?
             RETURNING id, title, completed, created_at",
        )
        .bind(patch.title.as_ref().map(Title::as_str))
        .bind(patch.completed)
        .bind(id)
        .fetch_optional(session.conn())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let todo = todo_from_row(&row)?;
        session.commit().await?;
        tracing::debug!(id, completed = todo.completed, "updated todo");
        Ok(Some(todo))
    }

    async fn delete_todo(&self, id: i64) -> Result<(), TodoError> {
        let mut session = self.begin().await?;
        let result = sqlx::query("DELETE FROM todos WHERE id = ?")
            .bind(id)
            .execute(session.conn())
            .await?;
        if result.rows_affected() == 0 {
            return Err(TodoError::NotFound);
        }
        session.commit().await?;
        tracing::debug!(id, "deleted todo");
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TITLE_REQUIRED, TodoPatch};

    fn title(raw: &str) -> Title {
        Title::parse(raw, TITLE_REQUIRED).unwrap()
    }

    fn memory() -> SqliteStorage {
        SqliteStorage::connect("sqlite::memory:", 5).unwrap()
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let storage = memory();
        storage.ensure_schema().await.unwrap();
        storage.ensure_schema().await.unwrap();
        sqlx::query(SCHEMA).execute(&storage.pool).await.unwrap();
        assert!(storage.list_todos().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_sets_defaults() {
        let storage = memory();
        let todo = storage.create_todo(title("water plants")).await.unwrap();
        assert_eq!(todo.title, "water plants");
        assert!(!todo.completed);
        assert!(todo.id > 0);
        let age = chrono::Utc::now() - todo.created_at;
        assert!(age.num_minutes() < 5);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let storage = memory();
        let first = storage.create_todo(title("one")).await.unwrap();
        let second = storage.create_todo(title("two")).await.unwrap();
        storage.delete_todo(second.id).await.unwrap();
        let third = storage.create_todo(title("three")).await.unwrap();
        assert!(third.id > second.id);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn update_checks_existence_before_title() {
        let storage = memory();
        let patch = TodoPatch {
            title: Some("   ".into()),
            completed: None,
        };
        assert!(matches!(
            storage.update_todo(404, patch).await,
            Err(TodoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn rejected_update_leaves_row_untouched() {
        let storage = memory();
        let todo = storage.create_todo(title("keep me")).await.unwrap();
        let patch = TodoPatch {
            title: Some("".into()),
            completed: Some(true),
        };
        assert!(matches!(
            storage.update_todo(todo.id, patch).await,
            Err(TodoError::Validation(_))
        ));
        let todos = storage.list_todos().await.unwrap();
        assert_eq!(todos, vec![todo]);
    }

    #[tokio::test]
    async fn empty_patch_returns_current_row() {
        let storage = memory();
        let todo = storage.create_todo(title("as is")).await.unwrap();
        let same = storage
            .update_todo(todo.id, TodoPatch::default())
            .await
            .unwrap();
        assert_eq!(same, todo);
    }

    #[tokio::test]
    async fn patch_writes_only_supplied_columns() {
        let storage = memory();
        let todo = storage.create_todo(title("old")).await.unwrap();
        let done = ValidPatch {
            title: None,
            completed: Some(true),
        };
        storage.apply_patch(todo.id, done).await.unwrap();
        let renamed = ValidPatch {
            title: Some(title("new")),
            completed: None,
        };
        let updated = storage.apply_patch(todo.id, renamed).await.unwrap().unwrap();
        assert_eq!(updated.title, "new");
        assert!(updated.completed);
        assert_eq!(updated.created_at, todo.created_at);
    }

    #[tokio::test]
    async fn patch_on_unknown_id_is_not_found() {
        let storage = memory();
        let patch = TodoPatch {
            title: None,
            completed: Some(true),
        };
        assert!(matches!(
            storage.update_todo(7, patch).await,
            Err(TodoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn closed_pool_surfaces_database_error() {
        let storage = memory();
        storage.ensure_schema().await.unwrap();
        storage.close().await;
        assert!(matches!(
            storage.list_todos().await,
            Err(TodoError::Database(_))
        ));
        assert!(storage.ping().await.is_err());
    }
}
