use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub const TITLE_REQUIRED: &str = "title is required";
pub const TITLE_EMPTY: &str = "title cannot be empty";
pub const TITLE_TOO_LONG: &str = "title is too long";

#[derive(Error, Debug)]
pub enum TodoError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("not_found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TodoError {
    pub fn status(&self) -> StatusCode {
        match self {
            TodoError::Validation(_) => StatusCode::BAD_REQUEST,
            TodoError::NotFound => StatusCode::NOT_FOUND,
            TodoError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TodoError {
    fn into_response(self) -> Response {
        let message = match &self {
            TodoError::Validation(msg) => *msg,
            TodoError::NotFound => "not_found",
            TodoError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "db_error"
            }
        };
        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}
