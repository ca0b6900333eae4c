//! Process execution backend for external tools
//!
//! Every tool invocation ends up here as an argument vector. Commands are
//! never handed to a shell by this module; the only shell use is the explicit
//! raw-command tool, which builds `sh -c` itself after the gateway has
//! authorised it.
//!
//! Children are spawned in their own process group so that a timeout kills
//! the whole tree (nmap and msfconsole both fork helpers), and with
//! `kill_on_drop` so that a cancelled task does not leak the child.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// A fully resolved command to run
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Optional data written to the child's stdin before it is closed
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            timeout,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Human-readable command line, for logs and transcripts only
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured output of a finished process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, -1 when the process was terminated by a signal
    pub exit_code: i32,
    pub duration_ms: f64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from launching or supervising a process
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exceeded timeout of {}s", .after.as_secs())]
    TimedOut { program: String, after: Duration },

    #[error("I/O error while supervising '{program}': {message}")]
    Io { program: String, message: String },
}

/// Outbound interface for running external programs
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput, LaunchError>;
}

/// Launcher backed by `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput, LaunchError> {
        let start = Instant::now();
        let program = spec.program.clone();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(program = %program, pid = ?pid, "process spawned");

        if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
            // The child may exit without reading all of it; stdin closes on drop
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "stdin not fully consumed");
                }
            });
        }

        let mut stdout = child.stdout.take().ok_or_else(|| LaunchError::Io {
            program: program.clone(),
            message: "stdout unavailable".to_string(),
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| LaunchError::Io {
            program: program.clone(),
            message: "stderr unavailable".to_string(),
        })?;

        let mut stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        });
        let mut stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.map(|_| buf)
        });

        // The deadline covers draining the pipes too: a helper that inherited
        // stdout keeps it open after the leader exits.
        let supervised = async {
            let status = child.wait().await.map_err(|e| LaunchError::Io {
                program: program.clone(),
                message: e.to_string(),
            })?;
            #[cfg(unix)]
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            let stdout = join_output(&mut stdout_task, &program).await?;
            let stderr = join_output(&mut stderr_task, &program).await?;
            Ok::<_, LaunchError>((status, stdout, stderr))
        };
        let outcome = tokio::time::timeout(spec.timeout, supervised).await;

        match outcome {
            Ok(result) => {
                let (status, stdout, stderr) = result?;
                Ok(ProcessOutput {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                })
            }
            Err(_) => {
                warn!(program = %program, pid = ?pid, timeout_secs = spec.timeout.as_secs(), "process timed out, killing");
                #[cfg(unix)]
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let _ = child.kill().await;
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                Err(LaunchError::TimedOut { program, after: spec.timeout })
            }
        }
    }
}

async fn join_output(
    task: &mut tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    program: &str,
) -> Result<String, LaunchError> {
    let bytes = task
        .await
        .map_err(|e| LaunchError::Io { program: program.to_string(), message: e.to_string() })?
        .map_err(|e| LaunchError::Io { program: program.to_string(), message: e.to_string() })?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// Kill every process in the child's group (the child is the group leader).
/// Also used after a clean exit to reap helpers left running in the group.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(pid, error = %e, "killpg skipped, group already gone");
    }
}
