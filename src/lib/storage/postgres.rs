use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Postgres, Row,
    postgres::{PgPool, PgPoolOptions, PgRow},
};
use tokio::sync::OnceCell;

use crate::core::{Title, Todo, TodoError, ValidPatch};
use crate::storage::{Session, Storage};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS todos (
    id SERIAL PRIMARY KEY,
    title VARCHAR(255) NOT NULL,
    completed BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

pub struct PostgresStorage {
    pool: PgPool,
    schema: OnceCell<()>,
}

impl PostgresStorage {
    /// Connections are pinged before they are handed out.
    pub fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .test_before_acquire(true)
            .connect_lazy(url)?;
        Ok(Self {
            pool,
            schema: OnceCell::new(),
        })
    }

    async fn begin(&self) -> Result<Session<Postgres>, TodoError> {
        self.ensure_schema().await?;
        Ok(Session::begin(&self.pool).await?)
    }
}

fn todo_from_row(row: &PgRow) -> Result<Todo, sqlx::Error> {
    let id: i32 = row.try_get("id")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(Todo {
        id: i64::from(id),
        title: row.try_get("title")?,
        completed: row.try_get("completed")?,
        created_at,
    })
}

/// `SERIAL` ids are 32-bit; anything outside that range cannot exist.
fn row_id(id: i64) -> Option<i32> {
    i32::try_from(id).ok()
}

#[async_trait]
impl Storage for PostgresStorage {
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
            "INSERT INTO todos (title, completed) VALUES ($1, FALSE)
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
        let Some(row_id) = row_id(id) else {
            return Ok(None);
        };
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT id, title, completed, created_at FROM todos WHERE id = $1")
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(todo_from_row).transpose()?)
    }

    async fn apply_patch(&self, id: i64, patch: ValidPatch) -> Result<Option<Todo>, TodoError> {
        let Some(row_id) = row_id(id) else {
            return Ok(None);
        };
        let mut session = self.begin().await?;
        let row = sqlx::query(
            "UPDATE todos SET title = COALESCE($1, title), completed = COALESCE($2, completed)
             WHERE id = $3
             RETURNING id, title, completed, created_at",
        )
        .bind(patch.title.as_ref().map(Title::as_str))
        .bind(patch.completed)
        .bind(row_id)
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
        let row_id = row_id(id).ok_or(TodoError::NotFound)?;
        let mut session = self.begin().await?;
        let result = sqlx::query("DELETE FROM todos WHERE id = $1")
            .bind(row_id)
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
