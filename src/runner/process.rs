//! Subprocess execution for worker invocations.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::config::PoolConfig;
use crate::registry::spec::WorkerSpec;
use crate::runner::command;
use crate::runner::outcome::WorkerOutcome;

/// Seam between the registry and the external agent process.
///
/// `invoke` is infallible by contract: every error path (spawn failure,
/// timeout, non-zero exit, malformed output) becomes a Failure outcome.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    async fn invoke(
        &self,
        spec: &WorkerSpec,
        resume: Option<&str>,
        env: Vec<(String, String)>,
    ) -> WorkerOutcome;
}

/// Production runner: drives the agent CLI as a subprocess.
pub struct CliRunner {
    config: PoolConfig,
}

impl CliRunner {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerRunner for CliRunner {
    async fn invoke(
        &self,
        spec: &WorkerSpec,
        resume: Option<&str>,
        env: Vec<(String, String)>,
    ) -> WorkerOutcome {
        let plan = command::build(&self.config, spec, resume, env);
        let timeout = spec.timeout.unwrap_or(self.config.default_timeout);

        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &plan.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return WorkerOutcome::exception(format!(
                    "failed to spawn agent command '{}': {e}",
                    plan.program
                ));
            }
        };

        let Some(stdout) = child.stdout.take() else {
            return WorkerOutcome::exception("failed to capture agent stdout");
        };
        let Some(stderr) = child.stderr.take() else {
            return WorkerOutcome::exception("failed to capture agent stderr");
        };

        let stdout_handle = tokio::spawn(async move {
            let mut output = String::new();
            let mut reader = BufReader::new(stdout);
            let _ = reader.read_to_string(&mut output).await;
            output
        });

        // Retain only the tail of stderr to bound memory on chatty failures.
        let max_lines = self.config.stderr_excerpt_lines;
        let stderr_handle = tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            let mut tail: Vec<String> = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                tail.push(line);
                if tail.len() > max_lines {
                    tail.remove(0);
                }
            }
            tail
        });

        let exit_status = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => status,
                    Err(e) => {
                        return WorkerOutcome::exception(format!(
                            "failed to wait for agent process: {e}"
                        ));
                    }
                }
            }
            _ = tokio::time::sleep(timeout) => {
                // kill() reaps the child, so no orphan survives this return
                if let Err(e) = child.kill().await {
                    tracing::warn!(%e, "failed to kill timed-out agent process");
                }
                return WorkerOutcome::exception(format!(
                    "agent process timed out after {} seconds",
                    timeout.as_secs()
                ));
            }
        };

        let stdout_output = stdout_handle.await.unwrap_or_default();
        let stderr_tail = stderr_handle.await.unwrap_or_default();

        if !exit_status.success() {
            let exit_code = exit_status.code().unwrap_or(-1);
            let excerpt = bounded_excerpt(&stderr_tail, self.config.stderr_excerpt_bytes);
            tracing::debug!(exit_code, "agent process exited non-zero");
            return WorkerOutcome::exited(exit_code, excerpt);
        }

        WorkerOutcome::from_success_stdout(stdout_output.trim())
    }
}

/// Join the retained stderr lines and cap the result at `max_bytes`,
/// keeping the tail.
fn bounded_excerpt(lines: &[String], max_bytes: usize) -> String {
    let joined = lines.join("\n");
    if joined.len() <= max_bytes {
        return joined;
    }
    let mut start = joined.len() - max_bytes;
    while !joined.is_char_boundary(start) {
        start += 1;
    }
    joined[start..].to_string()
}
