use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse lifecycle of a command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CommandStatus {
    Pending = 0,
    Queued = 1,
    Running = 2,
    Succeeded = 3,
    Failed = 4,
}

impl CommandStatus {
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl TryFrom<i32> for CommandStatus {
    type Error = AppError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Queued),
            2 => Ok(Self::Running),
            3 => Ok(Self::Succeeded),
            4 => Ok(Self::Failed),
            other => Err(AppError::InvalidState(format!(
                "unexpected command status: {}",
                other
            ))),
        }
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::BadRequest(format!("unknown status: {}", raw))),
        }
    }
}

/// Step cursor of a run. Each value names the last step that completed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum RunStatus {
    Begin = 0,
    CheckedRemote = 1,
    Forked = 2,
    ClonedOrPulled = 3,
    CheckedOut = 4,
    ToolExecuted = 5,
    ChangesAdded = 6,
    ChangesCommitted = 7,
    ChangesPushed = 8,
    CommitIdFetched = 9,
    End = 10,
}

impl RunStatus {
    /// The single legal successor. Push and commit-id steps only follow a
    /// commit that produced changes; `End` maps to itself.
    pub fn next(self, has_changes: bool) -> RunStatus {
        match self {
            Self::Begin => Self::CheckedRemote,
            Self::CheckedRemote => Self::Forked,
            Self::Forked => Self::ClonedOrPulled,
            Self::ClonedOrPulled => Self::CheckedOut,
            Self::CheckedOut => Self::ToolExecuted,
            Self::ToolExecuted => Self::ChangesAdded,
            Self::ChangesAdded => Self::ChangesCommitted,
            Self::ChangesCommitted if has_changes => Self::ChangesPushed,
            Self::ChangesCommitted => Self::End,
            Self::ChangesPushed => Self::CommitIdFetched,
            Self::CommitIdFetched => Self::End,
            Self::End => Self::End,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::End
    }
}

impl TryFrom<i32> for RunStatus {
    type Error = AppError;

    fn try_from(code: i32) -> Result<Self> {
        let status = match code {
            0 => Self::Begin,
            1 => Self::CheckedRemote,
            2 => Self::Forked,
            3 => Self::ClonedOrPulled,
            4 => Self::CheckedOut,
            5 => Self::ToolExecuted,
            6 => Self::ChangesAdded,
            7 => Self::ChangesCommitted,
            8 => Self::ChangesPushed,
            9 => Self::CommitIdFetched,
            10 => Self::End,
            other => {
                return Err(AppError::InvalidState(format!(
                    "unexpected run status: {}",
                    other
                )));
            }
        };
        Ok(status)
    }
}

/// Step successor for a raw persisted cursor value.
pub fn next_step(current: i32, has_changes: bool) -> Result<RunStatus> {
    Ok(RunStatus::try_from(current)?.next(has_changes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parses `owner/name`, tolerating a leading `https://github.com/`.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path
            .trim()
            .trim_start_matches("https://github.com/")
            .trim_end_matches(".git")
            .trim_matches('/');
        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if is_valid_segment(owner) && is_valid_segment(name) => {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(AppError::BadRequest(format!(
                "invalid repository path: {}",
                path
            ))),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub status: CommandStatus,
    pub run_status: RunStatus,
    pub command: String,
    pub repo: RepoRef,
    pub has_changes: bool,
    pub commit_id: Option<String>,
    pub global_options: Vec<String>,
    pub command_options: Vec<String>,
    pub target_paths: Vec<String>,
    /// A locked command refuses updates and removal.
    pub locked: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Command {
    /// `global_options + [command] + command_options + ["."] + target_paths`
    pub fn tool_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(
            self.global_options.len() + self.command_options.len() + self.target_paths.len() + 2,
        );
        args.extend(self.global_options.iter().cloned());
        args.push(self.command.clone());
        args.extend(self.command_options.iter().cloned());
        args.push(".".to_string());
        args.extend(self.target_paths.iter().cloned());
        args
    }

    /// Branch the tool's changes are committed and pushed on.
    pub fn work_branch(&self, program: &str) -> String {
        format!("{}/{}", program, self.command)
    }

    pub fn next_step(&self) -> RunStatus {
        self.run_status.next(self.has_changes)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCommand {
    pub repo: String,
    pub command: String,
    #[serde(default)]
    pub global_options: Vec<String>,
    #[serde(default)]
    pub command_options: Vec<String>,
    #[serde(default)]
    pub target_paths: Vec<String>,
    #[serde(default)]
    pub execute_now: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandUpdate {
    pub global_options: Option<Vec<String>>,
    pub command_options: Option<Vec<String>>,
    pub target_paths: Option<Vec<String>>,
    #[serde(default)]
    pub execute_now: bool,
}
