mod command_repository;
mod connection;

pub use command_repository::SqliteCommandStore;
pub use connection::establish_connection;

use crate::error::{AppError, Result};
use crate::models::{Command, CommandStatus, RepoRef};
use async_trait::async_trait;

pub type DbPool = sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrder {
    CreatedAsc,
    UpdatedDesc,
}

/// Fields supplied when a command record is first written.
#[derive(Debug, Clone)]
pub struct CommandDraft {
    pub repo: RepoRef,
    pub command: String,
    pub global_options: Vec<String>,
    pub command_options: Vec<String>,
    pub target_paths: Vec<String>,
}

/// Durable command records.
///
/// `save` and `delete` are optimistic: they only apply when the stored
/// `version` still equals the caller's copy, and fail with
/// [`AppError::Conflict`] otherwise. A successful `save` returns the record
/// with its bumped version.
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn create(&self, draft: CommandDraft) -> Result<Command>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Command>>;

    async fn find_by_status(&self, status: CommandStatus, order: CommandOrder)
    -> Result<Vec<Command>>;

    async fn list(&self) -> Result<Vec<Command>>;

    async fn save(&self, command: &Command) -> Result<Command>;

    /// Writes only the status, without the version guard and without
    /// decoding the row. Used to fail commands whose rows no longer decode.
    async fn force_status(&self, id: &str, status: CommandStatus) -> Result<()>;

    async fn delete(&self, command: &Command) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Command> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::CommandNotFound(id.to_string()))
    }
}
