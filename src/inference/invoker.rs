//! Execution of the external llama.cpp scripts.
//!
//! Every call spawns exactly one child process from an argument vector (no
//! shell is involved, so query text can never be interpreted as shell syntax),
//! captures stdout and stderr in full and waits for exit. A non-zero exit code
//! is data for the caller, not an error: partial output is still meaningful.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{CagError, Result};

/// A program plus its isolated argument values.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    /// Whether any argument equals `flag` exactly.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Human-readable rendering for logs. Never executed.
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&format!("{:?}", arg.to_string_lossy()));
        }
        out
    }
}

/// Captured result of one finished process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl InvocationOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands on behalf of the lifecycle manager and query bridge.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, spec: &CommandSpec) -> Result<InvocationOutput>;
}

/// Production invoker backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    /// `timeout = None` waits for the child indefinitely.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(&self, spec: &CommandSpec) -> Result<InvocationOutput> {
        let started = Instant::now();
        debug!(command = %spec.display(), "Spawning process");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The scripts run llama.cpp as a grandchild; a group of its own lets a
        // timeout reach every process the script started.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| CagError::Invocation {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();

        let output = match self.timeout {
            // Dropping the timed-out future drops the child, which kills it.
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    warn!(
                        program = %spec.program.display(),
                        timeout_secs = limit.as_secs(),
                        "Process timed out, killed"
                    );
                    return Err(CagError::Timeout {
                        program: spec.program.clone(),
                        timeout: limit,
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        let result = InvocationOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            program = %spec.program.display(),
            exit_code = result.exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Process finished"
        );

        Ok(result)
    }
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // SAFETY: killpg only sends a signal; the group id comes from our own child.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            pid,
            "Failed to signal process group: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
