//! External plugin checks
//!
//! The command line is split shell-style and run directly, without a shell.
//! The exit code gives the status (0 ok, 1 warning, 2 critical, anything
//! else unknown); stdout lines give the outputs, and the text after `|` on
//! the first line gives the perfdata.

use super::{CheckResult, CheckRunner, RunContext, Status};
use crate::error::CheckError;
use crate::perfdata::{parse_perfdata, split_output};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Time left to a terminated process between SIGTERM and SIGKILL.
const TERMINATION_GRACE: Duration = Duration::from_secs(1);

pub struct ExecRunner {
    command_line: String,
    argv: Vec<String>,
    last_pid: AtomicU32,
}

impl ExecRunner {
    pub fn new(command_line: &str) -> Result<Self, CheckError> {
        let argv = shell_words::split(command_line)?;
        Ok(Self {
            command_line: command_line.to_string(),
            argv,
            last_pid: AtomicU32::new(0),
        })
    }

    /// Pid of the most recently spawned process, if any.
    pub fn last_pid(&self) -> Option<u32> {
        match self.last_pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let (program, args) = match self.argv.split_first() {
            Some(split) => split,
            None => return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command")),
        };
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    fn build_result(&self, status: ExitStatus, stdout: &str) -> CheckResult {
        let status = status
            .code()
            .map(Status::from_exit_code)
            .unwrap_or(Status::Unknown);

        let outputs: Vec<String> = stdout
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        let perfdata = outputs
            .first()
            .and_then(|line| split_output(line).1)
            .map(parse_perfdata)
            .unwrap_or_default();

        CheckResult::new(status, perfdata, outputs)
    }
}

#[async_trait]
impl CheckRunner for ExecRunner {
    fn kind(&self) -> &'static str {
        "exec"
    }

    async fn run(&self, mut ctx: RunContext) -> CheckResult {
        if self.argv.is_empty() {
            return CheckResult::single(Status::Unknown, "empty command");
        }

        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("fail to execute {}: {}", self.command_line, e);
                return CheckResult::single(
                    Status::Unknown,
                    format!("Fail to execute {} : {}", self.command_line, e),
                );
            }
        };
        if let Some(pid) = child.id() {
            self.last_pid.store(pid, Ordering::Relaxed);
        }
        debug!("{} started, pid {:?}", self.command_line, child.id());

        let stdout = child.stdout.take();
        let stdout_reader = tokio::spawn(async move {
            let mut buffer = String::new();
            if let Some(mut out) = stdout {
                if let Err(e) = out.read_to_string(&mut buffer).await {
                    warn!("fail to read process stdout: {}", e);
                }
            }
            buffer
        });

        if let Some(stderr) = child.stderr.take() {
            let command_line = self.command_line.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    error!("{} stderr: {}", command_line, line);
                }
            });
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = ctx.terminated() => {
                info!("terminating {} (run #{})", self.command_line, ctx.running_index);
                terminate(&mut child).await
            }
        };

        let stdout = stdout_reader.await.unwrap_or_default();
        match status {
            Ok(status) => self.build_result(status, &stdout),
            Err(e) => {
                error!("fail to wait for {}: {}", self.command_line, e);
                CheckResult::single(
                    Status::Unknown,
                    format!("Fail to execute {} : {}", self.command_line, e),
                )
            }
        }
    }
}

/// SIGTERM, then SIGKILL if the process outlives the grace period.
async fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("fail to send SIGTERM to {}: {}", pid, e);
        }
        if let Ok(status) = tokio::time::timeout(TERMINATION_GRACE, child.wait()).await {
            return status;
        }
        warn!("process {} ignored SIGTERM, killing it", pid);
    }

    child.start_kill()?;
    child.wait().await
}
