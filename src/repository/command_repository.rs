use crate::error::{AppError, Result};
use crate::models::{Command, CommandStatus, RepoRef, RunStatus};
use crate::repository::{CommandDraft, CommandOrder, CommandStore, DbPool};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, sqlx::FromRow)]
struct CommandRow {
    id: String,
    status: i32,
    run_status: i32,
    command: String,
    repo_owner: String,
    repo_name: String,
    has_changes: bool,
    commit_id: Option<String>,
    global_options: String,
    command_options: String,
    target_paths: String,
    locked: bool,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<CommandRow> for Command {
    type Error = AppError;

    fn try_from(row: CommandRow) -> Result<Self> {
        Ok(Self {
            status: CommandStatus::try_from(row.status)?,
            run_status: RunStatus::try_from(row.run_status)?,
            global_options: decode_list(&row.id, &row.global_options)?,
            command_options: decode_list(&row.id, &row.command_options)?,
            target_paths: decode_list(&row.id, &row.target_paths)?,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
            id: row.id,
            command: row.command,
            repo: RepoRef {
                owner: row.repo_owner,
                name: row.repo_name,
            },
            has_changes: row.has_changes,
            commit_id: row.commit_id,
            locked: row.locked,
            version: row.version,
        })
    }
}

fn decode_list(id: &str, raw: &str) -> Result<Vec<String>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| {
        AppError::InvalidState(format!("command {} has a malformed list column: {}", id, e))
    })
}

fn encode_list(values: &[String]) -> Result<String> {
    serde_json::to_string(values)
        .map_err(|e| AppError::InvalidState(format!("Failed to serialize list: {}", e)))
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, status, run_status, command, repo_owner, repo_name, has_changes, commit_id,
           global_options, command_options, target_paths, locked, version, created_at,
           updated_at
    FROM commands
"#;

#[derive(Clone)]
pub struct SqliteCommandStore {
    pool: DbPool,
}

impl SqliteCommandStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn rows_into_commands(rows: Vec<CommandRow>) -> Result<Vec<Command>> {
        rows.into_iter().map(Command::try_from).collect()
    }
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn create(&self, draft: CommandDraft) -> Result<Command> {
        let now = Utc::now().timestamp_millis();
        let command = Command {
            id: uuid::Uuid::new_v4().to_string(),
            status: CommandStatus::Pending,
            run_status: RunStatus::Begin,
            command: draft.command,
            repo: draft.repo,
            has_changes: false,
            commit_id: None,
            global_options: draft.global_options,
            command_options: draft.command_options,
            target_paths: draft.target_paths,
            locked: false,
            version: 0,
            created_at: from_millis(now),
            updated_at: from_millis(now),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO commands (id, status, run_status, command, repo_owner, repo_name, has_changes,
                                  commit_id, global_options, command_options, target_paths, version,
                                  created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&command.id)
        .bind(command.status as i32)
        .bind(command.run_status as i32)
        .bind(&command.command)
        .bind(&command.repo.owner)
        .bind(&command.repo.name)
        .bind(command.has_changes)
        .bind(encode_list(&command.global_options)?)
        .bind(encode_list(&command.command_options)?)
        .bind(encode_list(&command.target_paths)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(command),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::Conflict(format!(
                    "repository={}, command={}",
                    command.repo.full_name(),
                    command.command
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Command>> {
        let row = sqlx::query_as::<_, CommandRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Command::try_from).transpose()
    }

    async fn find_by_status(
        &self,
        status: CommandStatus,
        order: CommandOrder,
    ) -> Result<Vec<Command>> {
        let order_by = match order {
            CommandOrder::CreatedAsc => "created_at ASC, rowid ASC",
            CommandOrder::UpdatedDesc => "updated_at DESC, rowid DESC",
        };
        let rows = sqlx::query_as::<_, CommandRow>(&format!(
            "{} WHERE status = ? ORDER BY {}",
            SELECT_COLUMNS, order_by
        ))
        .bind(status as i32)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_into_commands(rows)
    }

    async fn list(&self) -> Result<Vec<Command>> {
        let rows = sqlx::query_as::<_, CommandRow>(&format!(
            "{} ORDER BY updated_at DESC, rowid DESC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_into_commands(rows)
    }

    async fn save(&self, command: &Command) -> Result<Command> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE commands
            SET status = ?, run_status = ?, has_changes = ?, commit_id = ?, global_options = ?,
                command_options = ?, target_paths = ?, locked = ?, version = version + 1,
                updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(command.status as i32)
        .bind(command.run_status as i32)
        .bind(command.has_changes)
        .bind(&command.commit_id)
        .bind(encode_list(&command.global_options)?)
        .bind(encode_list(&command.command_options)?)
        .bind(encode_list(&command.target_paths)?)
        .bind(command.locked)
        .bind(now)
        .bind(&command.id)
        .bind(command.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(&command.id).await? {
                Some(_) => Err(AppError::Conflict(format!(
                    "command {} was modified concurrently",
                    command.id
                ))),
                None => Err(AppError::CommandNotFound(command.id.clone())),
            };
        }

        let mut saved = command.clone();
        saved.version += 1;
        saved.updated_at = from_millis(now);
        Ok(saved)
    }

    async fn force_status(&self, id: &str, status: CommandStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE commands SET status = ?, version = version + 1, updated_at = ? WHERE id = ?",
        )
        .bind(status as i32)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::CommandNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, command: &Command) -> Result<()> {
        let result = sqlx::query("DELETE FROM commands WHERE id = ? AND version = ? AND status <> ?")
            .bind(&command.id)
            .bind(command.version)
            .bind(CommandStatus::Running as i32)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(&command.id).await? {
                Some(_) => Err(AppError::Conflict(format!(
                    "command {} was modified concurrently or is running",
                    command.id
                ))),
                None => Err(AppError::CommandNotFound(command.id.clone())),
            };
        }

        Ok(())
    }
}
