#![allow(dead_code)]

use async_trait::async_trait;
use batch_node::error::Result;
use batch_node::executor::{Invocation, OutputSink, ProcessRunner};
use batch_node::git::{ForkSettings, RemoteHost, RemoteRepo, RepositoryClient};
use batch_node::models::{Command, CommandStatus, RepoRef, RunStatus};
use batch_node::paths::DataLayout;
use batch_node::repository::{
    CommandDraft, CommandStore, DbPool, SqliteCommandStore, establish_connection,
};
use batch_node::services::{
    EngineDeps, EngineSettings, ExecutionEngine, FileLogSink, LogKind, LogSink, RunOutcome,
    RunReport, ZipArchiver,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, broadcast};

pub const TOOL: &str = "batchai";
pub const FAKE_COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

/// Process runner double: records every invocation and answers git and tool
/// calls from a small script.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Invocation>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    pub tool_exit: AtomicI32,
    pub nothing_to_commit: AtomicBool,
    pub gate_tool: AtomicBool,
    pub tool_started: Notify,
    pub tool_release: Notify,
}

impl FakeRunner {
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// First word of each invocation, e.g. `"git clone"` or `"batchai"`.
    pub fn call_names(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|call| match call.program.as_str() {
                "git" => format!("git {}", call.args.first().cloned().unwrap_or_default()),
                other => other.to_string(),
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation, sink: &dyn OutputSink) -> Result<i32> {
        self.calls.lock().unwrap().push(invocation.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let code = if invocation.program == "git" {
            match invocation.args.first().map(String::as_str) {
                Some("commit") if self.nothing_to_commit.load(Ordering::SeqCst) => {
                    sink.stdout("nothing to commit, working tree clean");
                    1
                }
                Some("log") => {
                    sink.stdout(FAKE_COMMIT);
                    0
                }
                _ => 0,
            }
        } else {
            sink.stdout("tool output");
            if self.gate_tool.load(Ordering::SeqCst) {
                self.tool_started.notify_one();
                self.tool_release.notified().await;
            } else {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            self.tool_exit.load(Ordering::SeqCst)
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(code)
    }
}

#[derive(Default)]
pub struct FakeRemote {
    pub missing: Mutex<HashSet<String>>,
}

#[async_trait]
impl RemoteHost for FakeRemote {
    async fn repo_info(&self, owner: &str, repo: &str) -> Result<Option<RemoteRepo>> {
        if self
            .missing
            .lock()
            .unwrap()
            .contains(&format!("{}/{}", owner, repo))
        {
            return Ok(None);
        }
        Ok(Some(RemoteRepo {
            default_branch: "main".to_string(),
        }))
    }

    async fn create_fork(&self, _owner: &str, _repo: &str, _organization: &str) -> Result<()> {
        Ok(())
    }

    async fn branch_exists(&self, _owner: &str, _repo: &str, _branch: &str) -> Result<bool> {
        Ok(false)
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub layout: DataLayout,
    pub pool: DbPool,
    pub store: Arc<SqliteCommandStore>,
    pub runner: Arc<FakeRunner>,
    pub remote: Arc<FakeRemote>,
    pub log: Arc<FileLogSink>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::under(&dir.path().join("data"));
        layout.create_all().unwrap();

        let db_url = format!("sqlite:{}", dir.path().join("test.db").display());
        let pool = establish_connection(&db_url).await.unwrap();

        Self {
            log: Arc::new(FileLogSink::new(&layout.logs_dir)),
            layout,
            dir,
            store: Arc::new(SqliteCommandStore::new(pool.clone())),
            pool,
            runner: Arc::new(FakeRunner::default()),
            remote: Arc::new(FakeRemote::default()),
        }
    }

    pub fn start(&self) -> ExecutionEngine {
        let repos = RepositoryClient::new(
            self.runner.clone(),
            self.remote.clone(),
            ForkSettings {
                owner: "forks".to_string(),
                ssh: false,
                poll_attempts: 1,
                poll_interval: Duration::from_millis(1),
            },
            None,
        );
        let deps = EngineDeps {
            store: self.store.clone(),
            repos,
            runner: self.runner.clone(),
            log: self.log.clone(),
            archiver: Arc::new(ZipArchiver::new(&self.layout.archive_dir)),
        };
        let settings = EngineSettings {
            work_dir: self.layout.work_dir.clone(),
            tool_program: TOOL.to_string(),
            tool_timeout: None,
        };

        let (engine, _worker) = ExecutionEngine::start(deps, settings);
        engine
    }

    /// Writes a record directly, bypassing the engine.
    pub async fn seed(
        &self,
        repo: &str,
        command: &str,
        status: CommandStatus,
        run_status: RunStatus,
        has_changes: bool,
    ) -> Command {
        let mut record = self
            .store
            .create(CommandDraft {
                repo: RepoRef::parse(repo).unwrap(),
                command: command.to_string(),
                global_options: vec![],
                command_options: vec![],
                target_paths: vec![],
            })
            .await
            .unwrap();
        record.status = status;
        record.run_status = run_status;
        record.has_changes = has_changes;
        self.store.save(&record).await.unwrap()
    }

    pub async fn reload(&self, id: &str) -> Command {
        self.store.get(id).await.unwrap()
    }

    /// Working copy the engine clones the fork of `repo` into for `command`.
    pub fn fork_dir(&self, repo: &str, command: &str) -> std::path::PathBuf {
        let (owner, name) = repo.split_once('/').unwrap();
        self.layout
            .work_dir
            .join(owner)
            .join(name)
            .join(command)
            .join("forks")
            .join(name)
    }

    /// Status code straight from the table, readable even when the row no
    /// longer decodes.
    pub async fn raw_status(&self, id: &str) -> i32 {
        sqlx::query_scalar("SELECT status FROM commands WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub fn log_messages(&self, command: &Command) -> Vec<String> {
        self.messages_of(command, LogKind::Audit)
    }

    pub fn messages_of(&self, command: &Command, kind: LogKind) -> Vec<String> {
        self.log
            .read(command, kind)
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }
}

/// Waits for the worker to report on `id`, skipping reports for other commands.
pub async fn wait_for(events: &mut broadcast::Receiver<RunReport>, id: &str) -> RunOutcome {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let report = events.recv().await.unwrap();
            if report.command_id == id {
                return report.outcome;
            }
        }
    })
    .await
    .expect("timed out waiting for run report")
}

pub async fn next_report(events: &mut broadcast::Receiver<RunReport>) -> RunReport {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for run report")
        .unwrap()
}
