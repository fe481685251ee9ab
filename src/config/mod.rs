use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_FORK_OWNER: &str = "batchai-examples";
pub const DEFAULT_TOOL_PROGRAM: &str = "batchai";
pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub github_token: Option<String>,
    pub github_api_base: String,
    pub fork_owner: String,
    pub use_ssh: bool,
    pub tool_program: String,
    pub tool_timeout_secs: Option<u64>,
    pub git_timeout_secs: Option<u64>,
    pub fork_poll_attempts: u32,
    pub fork_poll_interval_secs: u64,
}

// Keeps the token out of startup logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("has_github_token", &self.github_token.is_some())
            .field("github_api_base", &self.github_api_base)
            .field("fork_owner", &self.fork_owner)
            .field("use_ssh", &self.use_ssh)
            .field("tool_program", &self.tool_program)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("git_timeout_secs", &self.git_timeout_secs)
            .field("fork_poll_attempts", &self.fork_poll_attempts)
            .field("fork_poll_interval_secs", &self.fork_poll_interval_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let database_url = crate::paths::data_dir()
            .map(|dir| format!("sqlite:{}", dir.join("batch_node.db").display()))
            .unwrap_or_else(|_| "sqlite:batch_node.db".to_string());
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: 6702,
            github_token: None,
            github_api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            fork_owner: DEFAULT_FORK_OWNER.to_string(),
            use_ssh: false,
            tool_program: DEFAULT_TOOL_PROGRAM.to_string(),
            tool_timeout_secs: None,
            git_timeout_secs: Some(600),
            fork_poll_attempts: 10,
            fork_poll_interval_secs: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = Self::from_conf_file()? {
            config.apply_file(file_config);
        }

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().unwrap_or(6702);
        }

        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.trim().is_empty() {
                config.github_token = Some(token);
            }
        }

        if let Ok(owner) = std::env::var("FORK_OWNER") {
            config.fork_owner = owner;
        }

        if let Ok(program) = std::env::var("TOOL_PROGRAM") {
            config.tool_program = program;
        }

        config.validate()?;
        config.normalize_database_url()?;
        Ok(config)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    pub fn git_timeout(&self) -> Option<Duration> {
        self.git_timeout_secs.map(Duration::from_secs)
    }

    fn from_conf_file() -> Result<Option<FileConfig>> {
        let path = crate::paths::conf_dir()?.join("config.json");
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(file_config))
    }

    fn apply_file(&mut self, file_config: FileConfig) {
        if let Some(database_url) = file_config.database_url {
            self.database_url = database_url;
        }
        if let Some(host) = file_config.host {
            self.host = host;
        }
        if let Some(port) = file_config.port {
            self.port = port;
        }
        if let Some(token) = file_config.github_token {
            self.github_token = Some(token);
        }
        if let Some(api_base) = file_config.github_api_base {
            self.github_api_base = api_base;
        }
        if let Some(fork_owner) = file_config.fork_owner {
            self.fork_owner = fork_owner;
        }
        if let Some(use_ssh) = file_config.use_ssh {
            self.use_ssh = use_ssh;
        }
        if let Some(tool_program) = file_config.tool_program {
            self.tool_program = tool_program;
        }
        if file_config.tool_timeout_secs.is_some() {
            self.tool_timeout_secs = file_config.tool_timeout_secs;
        }
        if file_config.git_timeout_secs.is_some() {
            self.git_timeout_secs = file_config.git_timeout_secs;
        }
        if let Some(attempts) = file_config.fork_poll_attempts {
            self.fork_poll_attempts = attempts;
        }
        if let Some(interval) = file_config.fork_poll_interval_secs {
            self.fork_poll_interval_secs = interval;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.fork_owner.trim().is_empty() {
            anyhow::bail!("fork_owner cannot be empty");
        }
        if self.tool_program.trim().is_empty() {
            anyhow::bail!("tool_program cannot be empty");
        }
        if self.fork_poll_attempts == 0 {
            anyhow::bail!("fork_poll_attempts must be at least 1");
        }
        Ok(())
    }

    fn normalize_database_url(&mut self) -> Result<()> {
        let Some(path_str) = self.database_url.strip_prefix("sqlite:") else {
            return Ok(());
        };

        let path = Path::new(path_str);
        if path.is_absolute() {
            return Ok(());
        }

        if path
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
        {
            anyhow::bail!("SQLite database path cannot contain '..'");
        }

        let root = crate::paths::install_root()?;
        let absolute = root.join(path);
        self.database_url = format!("sqlite:{}", absolute.display());
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    database_url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    github_token: Option<String>,
    github_api_base: Option<String>,
    fork_owner: Option<String>,
    use_ssh: Option<bool>,
    tool_program: Option<String>,
    tool_timeout_secs: Option<u64>,
    git_timeout_secs: Option<u64>,
    fork_poll_attempts: Option<u32>,
    fork_poll_interval_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let mut config = Config::default();
        let file: FileConfig = serde_json::from_str(
            r#"{"fork_owner": "my-org", "use_ssh": true, "tool_timeout_secs": 90}"#,
        )
        .unwrap();

        config.apply_file(file);

        assert_eq!(config.fork_owner, "my-org");
        assert!(config.use_ssh);
        assert_eq!(config.tool_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.tool_program, DEFAULT_TOOL_PROGRAM);
    }

    #[test]
    fn debug_output_hides_token() {
        let config = Config {
            github_token: Some("ghp_secret".to_string()),
            ..Config::default()
        };

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("has_github_token: true"));
    }

    #[test]
    fn empty_tool_program_is_rejected() {
        let config = Config {
            tool_program: "  ".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
