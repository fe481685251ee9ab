use super::remote::RemoteHost;
use crate::error::{AppError, Result};
use crate::executor::{CapturingSink, Invocation, OutputSink, ProcessRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const GIT: &str = "git";
const NOTHING_TO_COMMIT: &str = "nothing to commit";

/// Location of one remote repository and its local working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub owner: String,
    pub name: String,
    pub branch: String,
    pub ssh: bool,
    base_dir: PathBuf,
}

impl RepoHandle {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        owner: impl Into<String>,
        name: impl Into<String>,
        branch: impl Into<String>,
        ssh: bool,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            branch: branch.into(),
            ssh,
            base_dir: base_dir.into(),
        }
    }

    pub fn url(&self) -> String {
        if self.ssh {
            format!("git@github.com:{}/{}.git", self.owner, self.name)
        } else {
            format!("https://github.com/{}/{}", self.owner, self.name)
        }
    }

    pub fn owner_dir(&self) -> PathBuf {
        self.base_dir.join(&self.owner)
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.owner_dir().join(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct ForkSettings {
    pub owner: String,
    pub ssh: bool,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

/// Git and hosting operations used by a command run.
///
/// Every git invocation writes its command line, its streamed output and its
/// exit code to the caller's sink before returning, on success and failure.
#[derive(Clone)]
pub struct RepositoryClient {
    runner: Arc<dyn ProcessRunner>,
    remote: Arc<dyn RemoteHost>,
    fork: ForkSettings,
    git_timeout: Option<Duration>,
}

impl RepositoryClient {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        remote: Arc<dyn RemoteHost>,
        fork: ForkSettings,
        git_timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            remote,
            fork,
            git_timeout,
        }
    }

    /// Returns whether the repository exists and its default branch.
    pub async fn check_remote_exists(&self, owner: &str, repo: &str) -> Result<(bool, String)> {
        match self.remote.repo_info(owner, repo).await? {
            Some(info) => Ok((true, info.default_branch)),
            None => Ok((false, String::new())),
        }
    }

    /// Handle for the fork of `owner/repo`, working on `branch` under `base_dir`.
    /// No I/O is performed.
    pub fn forked_client_for(
        &self,
        base_dir: &Path,
        repo: &str,
        branch: &str,
    ) -> RepoHandle {
        RepoHandle::new(base_dir, &self.fork.owner, repo, branch, self.fork.ssh)
    }

    /// Makes sure the fork target exists, creating the fork and waiting for it
    /// to become visible when needed.
    pub async fn ensure_fork(&self, owner: &str, repo: &str, sink: &dyn OutputSink) -> Result<()> {
        if self.remote.repo_info(&self.fork.owner, repo).await?.is_some() {
            sink.stdout(&format!("already forked: {}/{}", self.fork.owner, repo));
            return Ok(());
        }

        sink.stdout(&format!("forking {}/{} to {}...", owner, repo, self.fork.owner));
        self.remote.create_fork(owner, repo, &self.fork.owner).await?;

        for attempt in 1..=self.fork.poll_attempts {
            if self.remote.repo_info(&self.fork.owner, repo).await?.is_some() {
                sink.stdout(&format!("found forked repo: {}/{}", self.fork.owner, repo));
                return Ok(());
            }
            if attempt < self.fork.poll_attempts {
                tokio::time::sleep(self.fork.poll_interval).await;
            }
        }

        Err(AppError::RemoteApi(format!(
            "fork {}/{} did not become available",
            self.fork.owner, repo
        )))
    }

    pub async fn clone_or_pull(&self, handle: &RepoHandle, sink: &dyn OutputSink) -> Result<()> {
        let repo_dir = handle.repo_dir();
        if repo_dir.is_dir() {
            sink.stdout(&format!("pulling in {}...", repo_dir.display()));
            self.git_checked(&repo_dir, &["pull"], sink).await?;
            return Ok(());
        }

        let owner_dir = handle.owner_dir();
        tokio::fs::create_dir_all(&owner_dir).await?;
        sink.stdout(&format!("cloning {}...", handle.url()));
        let url = handle.url();
        self.git_checked(&owner_dir, &["clone", "--depth", "1", &url], sink)
            .await?;
        Ok(())
    }

    /// Checks out `branch`, creating it when the rev-parse lookup says it does not exist.
    pub async fn checkout(
        &self,
        handle: &mut RepoHandle,
        branch: &str,
        sink: &dyn OutputSink,
    ) -> Result<()> {
        let repo_dir = handle.repo_dir();
        let exists = match self
            .git(&repo_dir, &["rev-parse", "--verify", branch], sink)
            .await
        {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => {
                sink.stderr(&format!("branch lookup failed: {}", e));
                false
            }
        };

        if exists {
            sink.stdout(&format!("branch '{}' exists. Checking out...", branch));
            self.git_checked(&repo_dir, &["checkout", branch], sink)
                .await?;
        } else {
            sink.stdout(&format!(
                "branch '{}' does not exist. Creating and checking out...",
                branch
            ));
            self.git_checked(&repo_dir, &["checkout", "-b", branch], sink)
                .await?;
        }

        handle.branch = branch.to_string();
        Ok(())
    }

    pub async fn add_all(&self, handle: &RepoHandle, sink: &dyn OutputSink) -> Result<()> {
        self.git_checked(&handle.repo_dir(), &["add", "."], sink)
            .await?;
        Ok(())
    }

    /// Returns `false` when git reports there is nothing to commit.
    pub async fn commit(
        &self,
        handle: &RepoHandle,
        message: &str,
        sink: &dyn OutputSink,
    ) -> Result<bool> {
        let args = ["commit", "-m", message];
        let (code, stdout) = self.git_capture(&handle.repo_dir(), &args, sink).await?;

        let nothing_to_commit = stdout.iter().any(|line| line.contains(NOTHING_TO_COMMIT));
        if nothing_to_commit {
            return Ok(false);
        }
        if code != 0 {
            return Err(vcs_failure(code, &args));
        }
        Ok(true)
    }

    /// Deletes the handle's branch on the remote; a missing branch is a no-op.
    pub async fn delete_remote_branch_if_exists(
        &self,
        handle: &RepoHandle,
        sink: &dyn OutputSink,
    ) -> Result<()> {
        if !self
            .remote
            .branch_exists(&handle.owner, &handle.name, &handle.branch)
            .await?
        {
            sink.stdout("no remote branch");
            return Ok(());
        }

        self.git_checked(
            &handle.repo_dir(),
            &["push", "origin", "--delete", &handle.branch],
            sink,
        )
        .await?;
        Ok(())
    }

    pub async fn push(&self, handle: &RepoHandle, sink: &dyn OutputSink) -> Result<()> {
        self.git_checked(
            &handle.repo_dir(),
            &["push", "--set-upstream", "origin", &handle.branch],
            sink,
        )
        .await?;
        Ok(())
    }

    pub async fn get_last_commit_id(
        &self,
        handle: &RepoHandle,
        sink: &dyn OutputSink,
    ) -> Result<String> {
        let args = ["log", "-1", "--format=%H"];
        let (code, stdout) = self.git_capture(&handle.repo_dir(), &args, sink).await?;
        if code != 0 {
            return Err(vcs_failure(code, &args));
        }

        stdout
            .into_iter()
            .map(|line| line.trim().to_string())
            .find(|line| !line.is_empty())
            .ok_or_else(|| AppError::VcsCommandFailure {
                exit_code: 0,
                command_line: "git log -1 --format=%H (no output)".to_string(),
            })
    }

    async fn git(&self, dir: &Path, args: &[&str], sink: &dyn OutputSink) -> Result<i32> {
        self.git_capture(dir, args, sink)
            .await
            .map(|(code, _)| code)
    }

    /// Runs git and returns its exit code with the stdout lines the process
    /// itself produced. The echoed command line and exit code go to `sink`
    /// only.
    async fn git_capture(
        &self,
        dir: &Path,
        args: &[&str],
        sink: &dyn OutputSink,
    ) -> Result<(i32, Vec<String>)> {
        let invocation = Invocation::new(
            dir,
            GIT,
            args.iter().map(|arg| arg.to_string()).collect(),
        )
        .with_timeout(self.git_timeout);

        let command_line = invocation.command_line();
        sink.stdout(&command_line);
        let capture = CapturingSink::new(sink);
        let result = self.runner.run(&invocation, &capture).await;
        match &result {
            Ok(code) => sink.stdout(&format!("exitCode={}, command line=\"{}\"", code, command_line)),
            Err(e) => sink.stderr(&format!("{}: {}", command_line, e)),
        }
        result.map(|code| (code, capture.stdout_lines()))
    }

    async fn git_checked(&self, dir: &Path, args: &[&str], sink: &dyn OutputSink) -> Result<()> {
        let code = self.git(dir, args, sink).await?;
        if code != 0 {
            return Err(vcs_failure(code, args));
        }
        Ok(())
    }
}

fn vcs_failure(exit_code: i32, args: &[&str]) -> AppError {
    AppError::VcsCommandFailure {
        exit_code,
        command_line: format!("{} {}", GIT, args.join(" ")),
    }
}
