use crate::models::Command;
use crate::services::{LogEntry, LogKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub id: String,
    pub repo: String,
    pub command: String,
    pub status: String,
    pub run_status: String,
    pub has_changes: bool,
    pub commit_id: Option<String>,
    pub global_options: Vec<String>,
    pub command_options: Vec<String>,
    pub target_paths: Vec<String>,
    pub locked: bool,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Command> for CommandResponse {
    fn from(command: Command) -> Self {
        Self {
            id: command.id,
            repo: command.repo.full_name(),
            command: command.command,
            status: format!("{:?}", command.status),
            run_status: format!("{:?}", command.run_status),
            has_changes: command.has_changes,
            commit_id: command.commit_id,
            global_options: command.global_options,
            command_options: command.command_options,
            target_paths: command.target_paths,
            locked: command.locked,
            version: command.version,
            created_at: command.created_at.to_rfc3339(),
            updated_at: command.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CommandsListResponse {
    pub data: Vec<CommandResponse>,
}

#[derive(Debug, Serialize)]
pub struct CommandLogResponse {
    pub id: String,
    pub kind: LogKind,
    pub data: Vec<LogEntry>,
}

#[derive(Debug, Serialize)]
pub struct ReportsResponse {
    pub id: String,
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListCommandsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveCommandQuery {
    #[serde(default)]
    pub archive: bool,
}
