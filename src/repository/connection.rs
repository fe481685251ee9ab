use crate::repository::DbPool;
use anyhow::Result;

pub async fn establish_connection(database_url: &str) -> Result<DbPool> {
    let db_url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{}", database_url)
    };

    // Create connection with create_if_missing option
    let connection_string = format!("{}?mode=rwc", db_url);
    let pool = sqlx::SqlitePool::connect(&connection_string).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commands (
            id TEXT PRIMARY KEY,
            status INTEGER NOT NULL,
            run_status INTEGER NOT NULL,
            command TEXT NOT NULL,
            repo_owner TEXT NOT NULL,
            repo_name TEXT NOT NULL,
            has_changes BOOLEAN NOT NULL DEFAULT 0,
            commit_id TEXT,
            global_options TEXT NOT NULL DEFAULT '[]',
            command_options TEXT NOT NULL DEFAULT '[]',
            target_paths TEXT NOT NULL DEFAULT '[]',
            locked BOOLEAN NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (repo_owner, repo_name, command)
        );

        CREATE INDEX IF NOT EXISTS idx_commands_status ON commands(status);
        CREATE INDEX IF NOT EXISTS idx_commands_repo ON commands(repo_owner, repo_name);
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}
