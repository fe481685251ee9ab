//! One handler per run step.
//!
//! [`perform`] maps the step about to be reached onto its handler. Handlers do
//! the external work and report the data it produced; persisting the new
//! cursor is the engine's job.

use crate::error::{AppError, Result};
use crate::executor::{Invocation, ProcessRunner};
use crate::git::{RepoHandle, RepositoryClient};
use crate::models::{Command, RunStatus};
use crate::services::archive::Archiver;
use crate::services::command_log::CommandOutput;
use std::path::Path;
use std::time::Duration;

/// Fields a step produced, applied to the command before it is saved.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub has_changes: Option<bool>,
    pub commit_id: Option<String>,
}

impl StepOutput {
    pub fn apply(self, command: &mut Command) {
        if let Some(has_changes) = self.has_changes {
            command.has_changes = has_changes;
        }
        if let Some(commit_id) = self.commit_id {
            command.commit_id = Some(commit_id);
        }
    }
}

pub struct StepContext<'a> {
    pub repos: &'a RepositoryClient,
    pub runner: &'a dyn ProcessRunner,
    pub archiver: &'a dyn Archiver,
    pub tool_program: &'a str,
    pub tool_timeout: Option<Duration>,
    pub work_dir: &'a Path,
    pub handle: RepoHandle,
    pub output: &'a CommandOutput<'a>,
}

pub async fn perform(
    step: RunStatus,
    ctx: &mut StepContext<'_>,
    command: &Command,
) -> Result<StepOutput> {
    match step {
        RunStatus::Begin => Err(AppError::InvalidState(
            "Begin is never the target of a step".to_string(),
        )),
        RunStatus::CheckedRemote => check_remote(ctx, command).await,
        RunStatus::Forked => fork(ctx, command).await,
        RunStatus::ClonedOrPulled => clone_or_pull(ctx).await,
        RunStatus::CheckedOut => checkout(ctx, command).await,
        RunStatus::ToolExecuted => execute_tool(ctx, command).await,
        RunStatus::ChangesAdded => add_changes(ctx).await,
        RunStatus::ChangesCommitted => commit_changes(ctx, command).await,
        RunStatus::ChangesPushed => push_changes(ctx).await,
        RunStatus::CommitIdFetched => fetch_commit_id(ctx).await,
        RunStatus::End => finish(ctx, command).await,
    }
}

async fn check_remote(ctx: &mut StepContext<'_>, command: &Command) -> Result<StepOutput> {
    let (exists, default_branch) = ctx
        .repos
        .check_remote_exists(&command.repo.owner, &command.repo.name)
        .await?;
    if !exists {
        return Err(AppError::RepoNotFound(command.repo.full_name()));
    }

    ctx.output.message(&format!(
        "remote repository validation - succeeded (default branch: {})",
        default_branch
    ));
    Ok(StepOutput::default())
}

async fn fork(ctx: &mut StepContext<'_>, command: &Command) -> Result<StepOutput> {
    ctx.repos
        .ensure_fork(&command.repo.owner, &command.repo.name, ctx.output)
        .await?;
    ctx.output
        .message(&format!("fork ready: {}", ctx.handle.url()));
    Ok(StepOutput::default())
}

async fn clone_or_pull(ctx: &mut StepContext<'_>) -> Result<StepOutput> {
    ctx.repos.clone_or_pull(&ctx.handle, ctx.output).await?;
    ctx.output.message(&format!(
        "working copy ready: {}",
        ctx.handle.repo_dir().display()
    ));
    Ok(StepOutput::default())
}

async fn checkout(ctx: &mut StepContext<'_>, command: &Command) -> Result<StepOutput> {
    let branch = command.work_branch(ctx.tool_program);
    ctx.repos
        .checkout(&mut ctx.handle, &branch, ctx.output)
        .await?;
    ctx.output
        .message(&format!("checked out branch: {}", branch));
    Ok(StepOutput::default())
}

async fn execute_tool(ctx: &mut StepContext<'_>, command: &Command) -> Result<StepOutput> {
    let invocation = Invocation::new(ctx.handle.repo_dir(), ctx.tool_program, command.tool_args())
        .with_timeout(ctx.tool_timeout);
    let command_line = invocation.command_line();

    ctx.output.message(&format!("exec begin: {}", command_line));
    let exit_code = ctx.runner.run(&invocation, ctx.output).await?;
    ctx.output.message(&format!(
        "exec end: exitCode={}, command={}",
        exit_code, command_line
    ));

    if exit_code != 0 {
        return Err(AppError::ToolExecutionFailure {
            exit_code,
            command_line,
        });
    }
    Ok(StepOutput::default())
}

async fn add_changes(ctx: &mut StepContext<'_>) -> Result<StepOutput> {
    ctx.repos.add_all(&ctx.handle, ctx.output).await?;
    ctx.output.message("added changes");
    Ok(StepOutput::default())
}

async fn commit_changes(ctx: &mut StepContext<'_>, command: &Command) -> Result<StepOutput> {
    let message = format!("changes by {} \"{}\"", ctx.tool_program, command.command);
    let has_changes = ctx
        .repos
        .commit(&ctx.handle, &message, ctx.output)
        .await?;
    ctx.output
        .message(if has_changes { "found changes" } else { "no changes" });

    Ok(StepOutput {
        has_changes: Some(has_changes),
        commit_id: None,
    })
}

async fn push_changes(ctx: &mut StepContext<'_>) -> Result<StepOutput> {
    ctx.repos
        .delete_remote_branch_if_exists(&ctx.handle, ctx.output)
        .await?;
    ctx.repos.push(&ctx.handle, ctx.output).await?;
    ctx.output
        .message(&format!("pushed changes to {}", ctx.handle.url()));
    Ok(StepOutput::default())
}

async fn fetch_commit_id(ctx: &mut StepContext<'_>) -> Result<StepOutput> {
    let commit_id = ctx
        .repos
        .get_last_commit_id(&ctx.handle, ctx.output)
        .await?;
    ctx.output
        .message(&format!("get last commit id: {}", commit_id));

    Ok(StepOutput {
        has_changes: None,
        commit_id: Some(commit_id),
    })
}

/// Archival here is best-effort; a failed archive never fails the run.
async fn finish(ctx: &mut StepContext<'_>, command: &Command) -> Result<StepOutput> {
    match ctx.archiver.archive(command, ctx.work_dir).await {
        Ok(Some(path)) => ctx
            .output
            .message(&format!("archived working copy: {}", path.display())),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(command_id = %command.id, "Failed to archive working copy: {}", e);
            ctx.output.message(&format!("archive skipped: {}", e));
        }
    }
    Ok(StepOutput::default())
}
