mod process_runner;

pub use process_runner::TokioProcessRunner;

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Receives output lines as a child process produces them.
pub trait OutputSink: Send + Sync {
    fn stdout(&self, line: &str);
    fn stderr(&self, line: &str);
}

/// One external program invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub work_dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(work_dir: impl Into<PathBuf>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            program: program.into(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the program to completion and returns its exit code. A process
    /// killed by a signal reports `-1`.
    async fn run(&self, invocation: &Invocation, sink: &dyn OutputSink) -> Result<i32>;
}

/// Forwards every line to an inner sink while keeping a copy of stdout.
pub struct CapturingSink<'a> {
    inner: &'a dyn OutputSink,
    stdout: Mutex<Vec<String>>,
}

impl<'a> CapturingSink<'a> {
    pub fn new(inner: &'a dyn OutputSink) -> Self {
        Self {
            inner,
            stdout: Mutex::new(Vec::new()),
        }
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl OutputSink for CapturingSink<'_> {
    fn stdout(&self, line: &str) {
        if let Ok(mut lines) = self.stdout.lock() {
            lines.push(line.to_string());
        }
        self.inner.stdout(line);
    }

    fn stderr(&self, line: &str) {
        self.inner.stderr(line);
    }
}

/// Sink that drops everything.
pub struct NullSink;

impl OutputSink for NullSink {
    fn stdout(&self, _line: &str) {}
    fn stderr(&self, _line: &str) {}
}
