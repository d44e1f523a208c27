// src/grading/sandbox.rs

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
    time::timeout,
};

use crate::config::SandboxConfig;

/// Output reported for a program killed by the wall-clock limit.
pub const TIMEOUT_OUTPUT: &str = "Execution timed out";

/// Bytes kept from each of stdout and stderr. The rest is discarded.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// What one run of a candidate program produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process never exited on its own.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    fn timed_out() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            timed_out: true,
        }
    }

    fn launch_failure(message: String) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Execution error: {}", message),
            exit_code: None,
            timed_out: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// The text compared against a test case's expected output.
    ///
    /// A failed run yields its stderr (stdout when stderr is empty), a
    /// timeout yields [`TIMEOUT_OUTPUT`].
    pub fn effective_output(&self) -> &str {
        if self.timed_out {
            return TIMEOUT_OUTPUT;
        }
        if self.succeeded() {
            return self.stdout.trim();
        }
        match self.stderr.trim() {
            "" => self.stdout.trim(),
            stderr => stderr,
        }
    }
}

/// Exact comparison after trimming both ends.
/// Internal whitespace and case are significant.
pub fn outputs_match(expected: &str, actual: &str) -> bool {
    expected.trim() == actual.trim()
}

/// Runs untrusted candidate code against one input.
///
/// Implementations never fail: every problem is reported in the outcome.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, source: &str, stdin: &str) -> ExecutionOutcome;
}

/// Interpreter based sandbox.
///
/// The source goes to a uniquely named temporary file which the
/// configured interpreter executes as a child process with the test input
/// on stdin. The child is killed when the wall-clock limit expires and the
/// file is removed on every path.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    program: String,
    extension: String,
    timeout: Duration,
}

impl ProcessSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            program: config.program.clone(),
            extension: config.extension.clone(),
            timeout: config.timeout,
        }
    }

    fn write_source(&self, source: &str) -> std::io::Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("candidate-")
            .suffix(&self.extension)
            .tempfile()?;
        file.write_all(source.as_bytes())?;
        file.flush()?;
        Ok(file)
    }
}

#[async_trait]
impl CodeRunner for ProcessSandbox {
    async fn run(&self, source: &str, stdin: &str) -> ExecutionOutcome {
        // Dropping the handle deletes the file; removal errors are ignored.
        let file = match self.write_source(source) {
            Ok(file) => file,
            Err(e) => return ExecutionOutcome::launch_failure(e.to_string()),
        };

        let mut child = match Command::new(&self.program)
            .arg(file.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Failed to launch {}: {}", self.program, e);
                return ExecutionOutcome::launch_failure(e.to_string());
            }
        };

        // Feed stdin from a separate task so a program that never reads
        // cannot stall us on a full pipe.
        if let Some(mut pipe) = child.stdin.take() {
            let input = stdin.as_bytes().to_vec();
            tokio::spawn(async move {
                let _ = pipe.write_all(&input).await;
            });
        }

        let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_capped(pipe)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_capped(pipe)));

        let finished = async {
            let status = child.wait().await?;
            let stdout = match stdout {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            let stderr = match stderr {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };

        let result = timeout(self.timeout, finished).await;
        let outcome = match result {
            Ok(Ok((status, stdout, stderr))) => ExecutionOutcome {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code: status.code(),
                timed_out: false,
            },
            Ok(Err(e)) => ExecutionOutcome::launch_failure(e.to_string()),
            Err(_) => {
                tracing::info!(timeout = ?self.timeout, "Candidate program timed out");
                // Closes the pipes, which ends the readers
                let _ = child.start_kill();
                ExecutionOutcome::timed_out()
            }
        };

        drop(file);
        outcome
    }
}

/// Reads up to [`MAX_OUTPUT_BYTES`] from a pipe, then drains the rest so
/// the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut kept = Vec::new();
    let _ = (&mut pipe)
        .take(MAX_OUTPUT_BYTES as u64)
        .read_to_end(&mut kept)
        .await;

    if let Ok(dropped) = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await {
        if dropped > 0 {
            tracing::debug!(dropped, "Candidate output truncated");
        }
    }
    kept
}
