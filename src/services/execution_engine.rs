//! Serialized, resumable command execution.
//!
//! One worker task drains a FIFO queue of command ids, so at most one command
//! runs at any time. A run walks the [`RunStatus`] cursor forward one step at
//! a time and saves the cursor after every step, which makes a crash between
//! steps leave a snapshot that `resume` can continue from. `stop` is
//! cooperative: the worker notices it at the next step boundary.

use crate::error::{AppError, Result};
use crate::executor::ProcessRunner;
use crate::git::{RepoHandle, RepositoryClient};
use crate::models::{Command, CommandStatus, CommandUpdate, NewCommand, RepoRef, RunStatus};
use crate::paths;
use crate::repository::{CommandDraft, CommandOrder, CommandStore};
use crate::services::archive::Archiver;
use crate::services::command_log::{CommandOutput, LogEntry, LogKind, LogSink};
use crate::services::reports::{self, ReportKind};
use crate::services::steps::{self, StepContext};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 256;
const FAIL_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub work_dir: PathBuf,
    pub tool_program: String,
    pub tool_timeout: Option<Duration>,
}

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn CommandStore>,
    pub repos: RepositoryClient,
    pub runner: Arc<dyn ProcessRunner>,
    pub log: Arc<dyn LogSink>,
    pub archiver: Arc<dyn Archiver>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Dequeued but no longer queued (stopped, removed or already handled).
    Skipped,
    /// Stop observed at a step boundary.
    Stopped,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub command_id: String,
    pub outcome: RunOutcome,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed: Vec<String>,
    pub requeued: Vec<String>,
}

enum LoopExit {
    Completed(Command),
    Stopped,
}

struct EngineInner {
    deps: EngineDeps,
    settings: EngineSettings,
    queue: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<RunReport>,
}

#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    /// Builds the engine and spawns its single worker task.
    pub fn start(deps: EngineDeps, settings: EngineSettings) -> (Self, JoinHandle<()>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(EngineInner {
            deps,
            settings,
            queue,
            events,
        });

        let worker = tokio::spawn(Self::worker(inner.clone(), receiver));
        (Self { inner }, worker)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunReport> {
        self.inner.events.subscribe()
    }

    async fn worker(inner: Arc<EngineInner>, mut receiver: mpsc::UnboundedReceiver<String>) {
        while let Some(command_id) = receiver.recv().await {
            let outcome = inner.execute(&command_id).await;
            match &outcome {
                RunOutcome::Skipped => {
                    tracing::info!(command_id = %command_id, "run command: cancelled")
                }
                RunOutcome::Stopped => {
                    tracing::info!(command_id = %command_id, "run command: stopped")
                }
                RunOutcome::Succeeded => {
                    tracing::info!(command_id = %command_id, "run command: succeeded")
                }
                RunOutcome::Failed(reason) => {
                    tracing::warn!(command_id = %command_id, "run command: failed: {}", reason)
                }
            }
            // no subscribers is fine
            let _ = inner.events.send(RunReport {
                command_id,
                outcome,
            });
        }
        tracing::info!("command queue closed, worker exiting");
    }

    /// Startup recovery: orphaned `Running` commands become `Failed`, `Queued`
    /// ones are resubmitted oldest first.
    pub async fn init_check(&self) -> Result<RecoveryReport> {
        let store = &self.inner.deps.store;
        let mut report = RecoveryReport::default();

        let interrupted = store
            .find_by_status(CommandStatus::Running, CommandOrder::CreatedAsc)
            .await?;
        if interrupted.is_empty() {
            tracing::info!("no interrupted commands");
        } else {
            tracing::warn!("found {} interrupted commands", interrupted.len());
        }
        for mut command in interrupted {
            tracing::warn!(command_id = %command.id, run_status = ?command.run_status, "interrupted command");
            command.status = CommandStatus::Failed;
            let saved = store.save(&command).await?;
            self.inner
                .log_message(&saved, "interrupted by process restart; marked as failed");
            report.failed.push(saved.id);
        }

        let queued = store
            .find_by_status(CommandStatus::Queued, CommandOrder::CreatedAsc)
            .await?;
        if queued.is_empty() {
            tracing::info!("no queued commands");
        } else {
            tracing::info!("found {} queued commands", queued.len());
        }
        for command in queued {
            self.inner.submit(&command.id)?;
            report.requeued.push(command.id);
        }

        Ok(report)
    }

    pub async fn create(&self, new: NewCommand) -> Result<Command> {
        let repo = RepoRef::parse(&new.repo)?;
        let name = new.command.trim();
        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(AppError::BadRequest(format!(
                "invalid command name: '{}'",
                new.command
            )));
        }

        tracing::info!("creating command: repo={}, command={}", repo.full_name(), name);
        let command = self
            .inner
            .deps
            .store
            .create(CommandDraft {
                repo,
                command: name.to_string(),
                global_options: new.global_options,
                command_options: new.command_options,
                target_paths: new.target_paths,
            })
            .await?;
        tracing::info!(command_id = %command.id, "successfully created command");

        if new.execute_now {
            return self.inner.enqueue_command(command).await;
        }
        Ok(command)
    }

    pub async fn update(&self, id: &str, changes: CommandUpdate) -> Result<Command> {
        let mut command = self.get(id).await?;
        ensure_unlocked(&command)?;
        if command.status == CommandStatus::Running {
            return Err(AppError::Conflict(format!(
                "cannot update a running command: {}",
                id
            )));
        }

        if let Some(options) = changes.global_options {
            command.global_options = options;
        }
        if let Some(options) = changes.command_options {
            command.command_options = options;
        }
        if let Some(paths) = changes.target_paths {
            command.target_paths = paths;
        }
        let command = self.inner.deps.store.save(&command).await?;
        tracing::info!(command_id = %id, "successfully updated command");

        if changes.execute_now {
            return self.restart(id).await;
        }
        Ok(command)
    }

    /// Queues a command that is neither queued nor running.
    pub async fn enqueue(&self, id: &str) -> Result<Command> {
        let command = self.get(id).await?;
        if matches!(
            command.status,
            CommandStatus::Queued | CommandStatus::Running
        ) {
            return Err(AppError::Conflict(format!(
                "cannot enqueue a {:?} command",
                command.status
            )));
        }
        self.inner.enqueue_command(command).await
    }

    /// Discards the working copy and log and runs the command from scratch.
    pub async fn restart(&self, id: &str) -> Result<Command> {
        let mut command = self.get(id).await?;
        tracing::info!(command_id = %id, "restarting command");
        if command.status == CommandStatus::Running {
            return Err(AppError::Conflict(format!(
                "cannot restart a running command: {}",
                id
            )));
        }

        self.inner.discard_artifacts(&command)?;

        let already_queued = command.status == CommandStatus::Queued;
        command.has_changes = false;
        command.commit_id = None;
        command.run_status = RunStatus::Begin;
        command.status = CommandStatus::Queued;
        let command = self.inner.deps.store.save(&command).await?;

        // a queued command already has an entry waiting in the queue
        if !already_queued {
            self.inner.submit(&command.id)?;
        }
        tracing::info!(command_id = %id, "successfully restarted command");
        Ok(command)
    }

    /// Continues a pending or failed command from its last completed step.
    pub async fn resume(&self, id: &str) -> Result<Command> {
        let command = self.get(id).await?;
        tracing::info!(command_id = %id, run_status = ?command.run_status, "resuming command");
        if !command.status.is_resumable() {
            return Err(AppError::Conflict(format!(
                "cannot resume a {:?} command",
                command.status
            )));
        }
        self.inner.enqueue_command(command).await
    }

    /// Asks a running command to stop at its next step boundary.
    pub async fn stop(&self, id: &str) -> Result<Command> {
        let mut command = self.get(id).await?;
        tracing::info!(command_id = %id, "stopping command");
        if command.status != CommandStatus::Running {
            return Err(AppError::Conflict(format!(
                "cannot stop a {:?} command",
                command.status
            )));
        }

        command.status = CommandStatus::Pending;
        let command = self.inner.deps.store.save(&command).await?;
        self.inner.log_message(&command, "stop requested");
        Ok(command)
    }

    pub async fn remove(&self, id: &str, archive: bool) -> Result<()> {
        let command = self.get(id).await?;
        tracing::info!(command_id = %id, "removing command");
        ensure_unlocked(&command)?;
        if command.status == CommandStatus::Running {
            return Err(AppError::Conflict(format!(
                "cannot remove a running command: {}",
                id
            )));
        }

        if archive {
            let source = self.inner.command_work_dir(&command);
            if let Err(e) = self.inner.deps.archiver.archive(&command, &source).await {
                tracing::warn!(command_id = %id, "Failed to archive before removal: {}", e);
            }
        }

        self.inner.deps.store.delete(&command).await?;
        if let Err(e) = self.inner.discard_artifacts(&command) {
            tracing::warn!(command_id = %id, "Failed to clean up removed command: {}", e);
        }
        tracing::info!(command_id = %id, "successfully removed command");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Command> {
        self.inner.deps.store.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<Command>> {
        self.inner.deps.store.list().await
    }

    pub async fn list_by_status(&self, status: CommandStatus) -> Result<Vec<Command>> {
        self.inner
            .deps
            .store
            .find_by_status(status, CommandOrder::UpdatedDesc)
            .await
    }

    pub async fn load_log(&self, id: &str, kind: LogKind) -> Result<Vec<LogEntry>> {
        let command = self.get(id).await?;
        self.inner.deps.log.read(&command, kind)
    }

    /// Check reports with issues, read from the command's working copy.
    pub async fn load_check_reports(&self, id: &str) -> Result<Vec<Value>> {
        self.load_reports(id, ReportKind::Check).await
    }

    pub async fn load_test_reports(&self, id: &str) -> Result<Vec<Value>> {
        self.load_reports(id, ReportKind::Test).await
    }

    async fn load_reports(&self, id: &str, kind: ReportKind) -> Result<Vec<Value>> {
        let command = self.get(id).await?;
        let repo_dir = self.inner.handle_for(&command).repo_dir();
        reports::load_reports(&reports::reports_dir(&repo_dir), kind).await
    }

    /// Path of the command's archive, creating it from the working copy when
    /// it does not exist yet.
    pub async fn resolve_archive(&self, id: &str) -> Result<PathBuf> {
        let command = self.get(id).await?;
        let archiver = &self.inner.deps.archiver;
        let path = archiver.archive_path(&command);
        if path.is_file() {
            return Ok(path);
        }

        let source = self.inner.command_work_dir(&command);
        match archiver.archive(&command, &source).await? {
            Some(created) => Ok(created),
            None => Err(AppError::Archive(format!(
                "no working copy to archive for command {}",
                id
            ))),
        }
    }

    pub async fn lock(&self, id: &str) -> Result<Command> {
        tracing::info!(command_id = %id, "locking command");
        let mut command = self.get(id).await?;
        if command.locked {
            return Err(AppError::BadRequest("already locked".to_string()));
        }
        command.locked = true;
        let command = self.inner.deps.store.save(&command).await?;
        tracing::info!(command_id = %id, "successfully locked command");
        Ok(command)
    }

    pub async fn unlock(&self, id: &str) -> Result<Command> {
        tracing::info!(command_id = %id, "unlocking command");
        let mut command = self.get(id).await?;
        if !command.locked {
            return Err(AppError::BadRequest("already unlocked".to_string()));
        }
        command.locked = false;
        let command = self.inner.deps.store.save(&command).await?;
        tracing::info!(command_id = %id, "successfully unlocked command");
        Ok(command)
    }
}

fn ensure_unlocked(command: &Command) -> Result<()> {
    if command.locked {
        return Err(AppError::Conflict(format!(
            "cannot change a locked command: {}",
            command.id
        )));
    }
    Ok(())
}

impl EngineInner {
    fn submit(&self, id: &str) -> Result<()> {
        self.queue
            .send(id.to_string())
            .map_err(|_| AppError::InvalidState("command queue is closed".to_string()))?;
        tracing::info!(command_id = %id, "successfully added command to queue");
        Ok(())
    }

    async fn enqueue_command(&self, mut command: Command) -> Result<Command> {
        tracing::info!(command_id = %command.id, "adding command to queue");
        if command.status != CommandStatus::Queued {
            command.status = CommandStatus::Queued;
            command = self.deps.store.save(&command).await?;
        }
        self.submit(&command.id)?;
        Ok(command)
    }

    fn command_work_dir(&self, command: &Command) -> PathBuf {
        paths::command_work_dir(
            &self.settings.work_dir,
            &command.repo.owner,
            &command.repo.name,
            &command.command,
        )
    }

    fn handle_for(&self, command: &Command) -> RepoHandle {
        self.deps.repos.forked_client_for(
            &self.command_work_dir(command),
            &command.repo.name,
            &command.work_branch(&self.settings.tool_program),
        )
    }

    fn discard_artifacts(&self, command: &Command) -> Result<()> {
        let work_dir = self.command_work_dir(command);
        match std::fs::remove_dir_all(&work_dir) {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.deps.log.clear(command)
    }

    fn log_message(&self, command: &Command, message: &str) {
        CommandOutput::new(self.deps.log.as_ref(), command).message(message);
    }

    /// Queue worker body. Never returns an error: every failure is folded
    /// into the outcome and, when the command was running, into its status.
    async fn execute(&self, id: &str) -> RunOutcome {
        // claim the command; a concurrent write (e.g. restart while queued) is retried
        let command = loop {
            let mut command = match self.deps.store.find_by_id(id).await {
                Ok(Some(command)) => command,
                Ok(None) => return RunOutcome::Skipped,
                Err(e) => return RunOutcome::Failed(e.to_string()),
            };
            if command.status != CommandStatus::Queued {
                return RunOutcome::Skipped;
            }

            command.status = CommandStatus::Running;
            match self.deps.store.save(&command).await {
                Ok(command) => break command,
                Err(AppError::Conflict(_)) => continue,
                Err(AppError::CommandNotFound(_)) => return RunOutcome::Skipped,
                Err(e) => return RunOutcome::Failed(e.to_string()),
            }
        };

        let snapshot = command.clone();
        let output = CommandOutput::new(self.deps.log.as_ref(), &snapshot);
        output.message("begin to run command");

        let result = match self.run_steps(command, &output).await {
            Ok(LoopExit::Completed(command)) => self.mark_succeeded(command).await,
            Ok(LoopExit::Stopped) => Ok(RunOutcome::Stopped),
            Err(e) => Err(e),
        };

        match result {
            Ok(RunOutcome::Succeeded) => {
                output.message("end to run command (succeeded)");
                RunOutcome::Succeeded
            }
            Ok(other) => {
                output.message("run stopped at step boundary");
                other
            }
            Err(e) => {
                if matches!(e, AppError::InvalidState(_)) {
                    tracing::error!(command_id = %id, "invalid run state, aborting: {}", e);
                }
                let reason = e.to_string();
                output.message(&reason);
                output.message("end to run command (failed)");
                self.mark_failed(id).await;
                RunOutcome::Failed(reason)
            }
        }
    }

    async fn run_steps(&self, mut command: Command, output: &CommandOutput<'_>) -> Result<LoopExit> {
        let work_dir = self.command_work_dir(&command);
        let handle = self.handle_for(&command);
        let mut ctx = StepContext {
            repos: &self.deps.repos,
            runner: self.deps.runner.as_ref(),
            archiver: self.deps.archiver.as_ref(),
            tool_program: &self.settings.tool_program,
            tool_timeout: self.settings.tool_timeout,
            work_dir: &work_dir,
            handle,
            output,
        };

        loop {
            let current = self.deps.store.get(&command.id).await?;
            if current.status != CommandStatus::Running {
                return Ok(LoopExit::Stopped);
            }
            command = current;

            let step = command.next_step();
            if step == command.run_status {
                return Ok(LoopExit::Completed(command));
            }

            tracing::debug!(command_id = %command.id, step = ?step, "running step");
            let produced = steps::perform(step, &mut ctx, &command).await?;
            let saved = self
                .save_running(command, |command| {
                    produced.clone().apply(command);
                    command.run_status = step;
                })
                .await?;
            command = match saved {
                Some(saved) => saved,
                None => return Ok(LoopExit::Stopped),
            };
        }
    }

    async fn mark_succeeded(&self, command: Command) -> Result<RunOutcome> {
        let saved = self
            .save_running(command, |command| command.status = CommandStatus::Succeeded)
            .await?;
        Ok(match saved {
            Some(_) => RunOutcome::Succeeded,
            None => RunOutcome::Stopped,
        })
    }

    /// Applies `change` and saves while the command is still running.
    ///
    /// A concurrent write that left the command running (a lock, say) is
    /// absorbed by reapplying `change` to the fresh record. `None` means the
    /// command left `Running` and the change was dropped.
    async fn save_running<F>(&self, mut command: Command, change: F) -> Result<Option<Command>>
    where
        F: Fn(&mut Command),
    {
        for _ in 0..FAIL_ATTEMPTS {
            change(&mut command);
            match self.deps.store.save(&command).await {
                Ok(saved) => return Ok(Some(saved)),
                Err(AppError::Conflict(_)) => {
                    let fresh = self.deps.store.get(&command.id).await?;
                    if fresh.status != CommandStatus::Running {
                        return Ok(None);
                    }
                    command = fresh;
                }
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict(format!(
            "command {} kept changing while saving progress",
            command.id
        )))
    }

    /// Moves a still-running command to `Failed`, retrying on concurrent writes.
    async fn mark_failed(&self, id: &str) {
        for _ in 0..FAIL_ATTEMPTS {
            let mut command = match self.deps.store.get(id).await {
                Ok(command) => command,
                Err(AppError::InvalidState(reason)) => {
                    tracing::error!(command_id = %id, "Command row is unreadable, forcing failed status: {}", reason);
                    if let Err(e) = self.deps.store.force_status(id, CommandStatus::Failed).await {
                        tracing::error!(command_id = %id, "Failed to force failed status: {}", e);
                    }
                    return;
                }
                Err(e) => {
                    tracing::error!(command_id = %id, "Failed to load command to mark failed: {}", e);
                    return;
                }
            };
            if command.status != CommandStatus::Running {
                return;
            }

            command.status = CommandStatus::Failed;
            match self.deps.store.save(&command).await {
                Ok(_) => return,
                Err(AppError::Conflict(_)) => continue,
                Err(e) => {
                    tracing::error!(command_id = %id, "Failed to mark command failed: {}", e);
                    return;
                }
            }
        }
        tracing::error!(command_id = %id, "Gave up marking command failed after concurrent updates");
    }
}
