use crate::error::{AppError, Result};
use crate::executor::OutputSink;
use crate::models::Command;
use crate::paths;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
}

/// The audit log records everything about a run: step messages and process
/// output. The execution log only keeps process output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    #[default]
    Audit,
    Execution,
}

impl LogKind {
    pub const ALL: [LogKind; 2] = [LogKind::Audit, LogKind::Execution];

    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Audit => "audit",
            LogKind::Execution => "execution",
        }
    }
}

impl std::str::FromStr for LogKind {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "audit" => Ok(Self::Audit),
            "execution" => Ok(Self::Execution),
            _ => Err(AppError::BadRequest(format!("unknown log kind: {}", raw))),
        }
    }
}

/// Durable append-only text logs per command, one per [`LogKind`].
pub trait LogSink: Send + Sync {
    fn append(&self, command: &Command, kind: LogKind, message: &str) -> Result<()>;

    fn read(&self, command: &Command, kind: LogKind) -> Result<Vec<LogEntry>>;

    /// Removes every kind of log for the command.
    fn clear(&self, command: &Command) -> Result<()>;
}

/// JSON-lines log files laid out as `<logs>/<owner>/<repo>/<id>.<kind>.log`.
pub struct FileLogSink {
    logs_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileLogSink {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn file_for(&self, command: &Command, kind: LogKind) -> PathBuf {
        paths::command_log_file(
            &self.logs_dir,
            &command.repo.owner,
            &command.repo.name,
            &command.id,
            kind.as_str(),
        )
    }
}

impl LogSink for FileLogSink {
    fn append(&self, command: &Command, kind: LogKind, message: &str) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            message: message.to_string(),
        };
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| AppError::InvalidState(format!("Failed to serialize log entry: {}", e)))?;
        line.push('\n');

        let path = self.file_for(command, kind);
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::InvalidState("log lock poisoned".to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn read(&self, command: &Command, kind: LogKind) -> Result<Vec<LogEntry>> {
        let path = self.file_for(command, kind);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        // a torn final line from a crash is skipped rather than failing the read
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    fn clear(&self, command: &Command) -> Result<()> {
        for kind in LogKind::ALL {
            match std::fs::remove_file(self.file_for(command, kind)) {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

/// Routes a command's messages into its logs and the server log.
///
/// [`message`](CommandOutput::message) is audit-only; process output arriving
/// through [`OutputSink`] is written to both logs.
pub struct CommandOutput<'a> {
    log: &'a dyn LogSink,
    command: &'a Command,
}

impl<'a> CommandOutput<'a> {
    pub fn new(log: &'a dyn LogSink, command: &'a Command) -> Self {
        Self { log, command }
    }

    pub fn message(&self, message: &str) {
        tracing::info!(command_id = %self.command.id, "command log: {}", message);
        self.write(LogKind::Audit, message);
    }

    fn output(&self, line: &str) {
        tracing::info!(command_id = %self.command.id, "command output: {}", line);
        self.write(LogKind::Audit, line);
        self.write(LogKind::Execution, line);
    }

    fn write(&self, kind: LogKind, message: &str) {
        if let Err(e) = self.log.append(self.command, kind, message) {
            tracing::error!(command_id = %self.command.id, "Failed to append {} log: {}", kind.as_str(), e);
        }
    }
}

impl OutputSink for CommandOutput<'_> {
    fn stdout(&self, line: &str) {
        self.output(line);
    }

    fn stderr(&self, line: &str) {
        self.output(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandStatus, RepoRef, RunStatus};

    fn command() -> Command {
        Command {
            id: "cmd-1".to_string(),
            status: CommandStatus::Running,
            run_status: RunStatus::Begin,
            command: "check".to_string(),
            repo: RepoRef {
                owner: "octo".to_string(),
                name: "hello".to_string(),
            },
            has_changes: false,
            commit_id: None,
            global_options: vec![],
            command_options: vec![],
            target_paths: vec![],
            locked: false,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn messages(sink: &FileLogSink, command: &Command, kind: LogKind) -> Vec<String> {
        sink.read(command, kind)
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }

    #[test]
    fn appended_lines_are_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileLogSink::new(dir.path());
        let command = command();

        sink.append(&command, LogKind::Audit, "begin to run command").unwrap();
        sink.append(&command, LogKind::Audit, "git pull").unwrap();

        assert_eq!(
            messages(&sink, &command, LogKind::Audit),
            vec!["begin to run command", "git pull"]
        );
        assert!(messages(&sink, &command, LogKind::Execution).is_empty());
        assert!(dir.path().join("octo/hello/cmd-1.audit.log").is_file());
    }

    #[test]
    fn process_output_reaches_both_logs_but_messages_only_audit() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileLogSink::new(dir.path());
        let command = command();
        let output = CommandOutput::new(&sink, &command);

        output.message("exec begin");
        output.stdout("tool says hi");
        output.stderr("tool warns");

        assert_eq!(
            messages(&sink, &command, LogKind::Audit),
            vec!["exec begin", "tool says hi", "tool warns"]
        );
        assert_eq!(
            messages(&sink, &command, LogKind::Execution),
            vec!["tool says hi", "tool warns"]
        );
    }

    #[test]
    fn clear_removes_every_log_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileLogSink::new(dir.path());
        let command = command();

        sink.clear(&command).unwrap();
        sink.append(&command, LogKind::Audit, "x").unwrap();
        sink.append(&command, LogKind::Execution, "y").unwrap();
        sink.clear(&command).unwrap();

        assert!(sink.read(&command, LogKind::Audit).unwrap().is_empty());
        assert!(sink.read(&command, LogKind::Execution).unwrap().is_empty());
    }

    #[test]
    fn log_kind_parses_case_insensitively() {
        assert_eq!("Execution".parse::<LogKind>().unwrap(), LogKind::Execution);
        assert!(matches!(
            "debug".parse::<LogKind>(),
            Err(AppError::BadRequest(_))
        ));
    }
}
