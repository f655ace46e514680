//! External sender process
//!
//! Runs a sender program as a child process and streams its output lines
//! to an [`OutputSink`]. The child is killed when the run is cancelled or
//! when the handle is dropped.

use async_trait::async_trait;
use relaypost_common::config::ExternalConfig;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Receives output as it arrives
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn on_stdout_line(&self, line: &str);
    async fn on_stderr_line(&self, line: &str);
}

/// How the child finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Exited { code: Option<i32> },
    /// Killed because the run was cancelled
    Cancelled,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited { code: Some(0) })
    }
}

#[derive(Debug, Clone)]
pub struct ExternalSender {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ExternalSender {
    pub fn new(program: impl Into<String>, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir,
        }
    }

    /// `None` when no program is configured
    pub fn from_config(config: &ExternalConfig) -> Option<Self> {
        let program = config.program.as_deref()?.trim();
        if program.is_empty() {
            return None;
        }
        Some(Self::new(program, config.args.clone(), config.working_dir.clone()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Spawn the child and pump its output until it exits or `cancel` fires
    pub async fn run(&self, sink: &dyn OutputSink, cancel: CancellationToken) -> io::Result<ProcessExit> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        info!(program = %self.program, pid = ?child.id(), "External sender started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr not captured"))?;
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);

        loop {
            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => sink.on_stdout_line(&line).await,
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        debug!(error = %e, "stdout read failed");
                        stdout_open = false;
                    }
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => sink.on_stderr_line(&line).await,
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        debug!(error = %e, "stderr read failed");
                        stderr_open = false;
                    }
                },
                status = child.wait(), if !stdout_open && !stderr_open => {
                    let code = status?.code();
                    info!(program = %self.program, ?code, "External sender exited");
                    return Ok(ProcessExit::Exited { code });
                },
                _ = cancel.cancelled() => {
                    info!(program = %self.program, "Killing external sender");
                    child.start_kill()?;
                    child.wait().await?;
                    return Ok(ProcessExit::Cancelled);
                },
            }
        }
    }
}
