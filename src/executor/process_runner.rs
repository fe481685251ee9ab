use super::{Invocation, OutputSink, ProcessRunner};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs programs as tokio child processes, streaming output line by line.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn pump<R>(reader: Option<R>, stream: Stream, sink: &dyn OutputSink)
    where
        R: AsyncRead + Unpin,
    {
        let Some(reader) = reader else {
            return;
        };

        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match stream {
                    Stream::Stdout => sink.stdout(&line),
                    Stream::Stderr => sink.stderr(&line),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read child {:?}: {}", stream, e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation, sink: &dyn OutputSink) -> Result<i32> {
        let command_line = invocation.command_line();
        tracing::debug!(work_dir = %invocation.work_dir.display(), "exec: {}", command_line);

        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.current_dir(&invocation.work_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| AppError::LaunchFailure {
            program: invocation.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            tokio::join!(
                Self::pump(stdout, Stream::Stdout, sink),
                Self::pump(stderr, Stream::Stderr, sink),
            );
            child.wait().await
        };

        let status = match invocation.timeout {
            Some(limit) => {
                let outcome = tokio::time::timeout(limit, run).await;
                match outcome {
                    Ok(status) => status?,
                    Err(_) => {
                        tracing::warn!("Killing timed out process: {}", command_line);
                        // kill() also waits, so the child is reaped here
                        if let Err(e) = child.kill().await {
                            tracing::error!("Failed to kill {}: {}", command_line, e);
                        }
                        return Err(AppError::Timeout {
                            command_line,
                            seconds: limit.as_secs(),
                        });
                    }
                }
            }
            None => run.await?,
        };

        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        stdout: Mutex<Vec<String>>,
        stderr: Mutex<Vec<String>>,
    }

    impl OutputSink for RecordingSink {
        fn stdout(&self, line: &str) {
            self.stdout.lock().unwrap().push(line.to_string());
        }
        fn stderr(&self, line: &str) {
            self.stderr.lock().unwrap().push(line.to_string());
        }
    }

    fn sh(script: &str) -> Invocation {
        Invocation::new(
            std::env::temp_dir(),
            "sh",
            vec!["-c".to_string(), script.to_string()],
        )
    }

    #[tokio::test]
    async fn streams_lines_in_order_per_stream() {
        let sink = RecordingSink::default();
        let code = TokioProcessRunner::new()
            .run(&sh("echo one; echo two; echo oops >&2; echo three"), &sink)
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(*sink.stdout.lock().unwrap(), vec!["one", "two", "three"]);
        assert_eq!(*sink.stderr.lock().unwrap(), vec!["oops"]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_returned_not_raised() {
        let sink = RecordingSink::default();
        let code = TokioProcessRunner::new()
            .run(&sh("exit 3"), &sink)
            .await
            .unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn runs_in_requested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink::default();
        let invocation = Invocation::new(dir.path(), "sh", vec!["-c".into(), "pwd".into()]);

        TokioProcessRunner::new().run(&invocation, &sink).await.unwrap();

        let reported = sink.stdout.lock().unwrap()[0].clone();
        assert_eq!(
            std::fs::canonicalize(reported).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let sink = RecordingSink::default();
        let invocation = sh("echo started; sleep 30").with_timeout(Some(Duration::from_millis(200)));

        let started = std::time::Instant::now();
        let err = TokioProcessRunner::new()
            .run(&invocation, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_failure() {
        let sink = RecordingSink::default();
        let invocation = Invocation::new(std::env::temp_dir(), "definitely-not-a-real-program-xyz", vec![]);

        let err = TokioProcessRunner::new()
            .run(&invocation, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::LaunchFailure { .. }));
    }
}
