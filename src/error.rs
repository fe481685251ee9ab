use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Remote repository not found: {0}")]
    RepoNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("git command failed: exitCode={exit_code}, command line=\"{command_line}\"")]
    VcsCommandFailure { exit_code: i32, command_line: String },

    #[error("tool execution failed: exitCode={exit_code}, command line=\"{command_line}\"")]
    ToolExecutionFailure { exit_code: i32, command_line: String },

    #[error("Remote API error: {0}")]
    RemoteApi(String),

    #[error("Failed to launch {program}: {source}")]
    LaunchFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process timed out after {seconds} seconds: {command_line}")]
    Timeout { command_line: String, seconds: u64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::CommandNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Command '{}' not found", id))
            }
            AppError::RepoNotFound(repo) => (
                StatusCode::NOT_FOUND,
                format!("Repository '{}' not found", repo),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::RemoteApi(msg) => (StatusCode::BAD_GATEWAY, msg),
            timeout @ AppError::Timeout { .. } => {
                (StatusCode::GATEWAY_TIMEOUT, timeout.to_string())
            }
            AppError::InvalidState(msg) => {
                tracing::error!("Invalid state: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };

        let body = json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
