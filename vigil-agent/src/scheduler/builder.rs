//! Turning configured commands into check runners
//!
//! The scheduler asks a [`CheckBuilder`] for the runner of every new
//! command. Native commands (JSON documents) map to the built-in checks;
//! anything else is an external process.

use crate::check::args::NativeCommand;
use crate::check::drive_size::worker::DriveSizeWorker;
use crate::check::drive_size::{DriveSizeRunner, FsStatsProvider, SysinfoFsStats};
use crate::check::cpu::CpuRunner;
use crate::check::dummy::DummyRunner;
use crate::check::exec::ExecRunner;
use crate::check::health::{HealthRunner, HealthThresholds};
use crate::check::{CheckIdentity, CheckRunner};
use crate::error::CheckError;
use crate::protocol::{AgentConfiguration, ConnectionMode};
use crate::statistics::SharedStatistics;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error};

/// What a builder may look at besides the command itself.
pub struct BuildContext<'a> {
    pub conf: &'a AgentConfiguration,
    pub statistics: &'a SharedStatistics,
}

pub trait CheckBuilder: Send + Sync + 'static {
    fn build(&self, identity: &CheckIdentity, ctx: &BuildContext<'_>) -> Result<Arc<dyn CheckRunner>, CheckError>;
}

impl<F> CheckBuilder for F
where
    F: Fn(&CheckIdentity, &BuildContext<'_>) -> Result<Arc<dyn CheckRunner>, CheckError> + Send + Sync + 'static,
{
    fn build(&self, identity: &CheckIdentity, ctx: &BuildContext<'_>) -> Result<Arc<dyn CheckRunner>, CheckError> {
        self(identity, ctx)
    }
}

/// Builder used by the agent: exec checks plus the native checks.
pub struct DefaultCheckBuilder {
    connection_mode: ConnectionMode,
    fs_provider: Arc<dyn FsStatsProvider>,
    drive_size_worker: Mutex<Option<Arc<DriveSizeWorker>>>,
}

impl DefaultCheckBuilder {
    pub fn new(connection_mode: ConnectionMode) -> Self {
        Self::with_fs_provider(connection_mode, Arc::new(SysinfoFsStats))
    }

    pub fn with_fs_provider(connection_mode: ConnectionMode, fs_provider: Arc<dyn FsStatsProvider>) -> Self {
        Self {
            connection_mode,
            fs_provider,
            drive_size_worker: Mutex::new(None),
        }
    }

    /// The worker thread is started by the first storage check.
    fn drive_size_worker(&self) -> Result<Arc<DriveSizeWorker>, CheckError> {
        let mut worker = self.drive_size_worker.lock();
        if let Some(worker) = worker.as_ref() {
            return Ok(Arc::clone(worker));
        }
        let started = Arc::new(
            DriveSizeWorker::start(Arc::clone(&self.fs_provider))
                .map_err(|e| CheckError::invalid_argument("storage", format!("cannot start worker: {}", e)))?,
        );
        *worker = Some(Arc::clone(&started));
        Ok(started)
    }

    /// Stop the drive size worker thread, if started.
    pub fn shutdown(&self) {
        if let Some(worker) = self.drive_size_worker.lock().take() {
            worker.shutdown();
        }
    }

    fn build_native(&self, native: &NativeCommand, ctx: &BuildContext<'_>) -> Result<Arc<dyn CheckRunner>, CheckError> {
        let args = native.args();
        match native.check.as_str() {
            "health" => Ok(Arc::new(HealthRunner::new(
                HealthThresholds::from_args(args)?,
                Arc::clone(ctx.statistics),
                self.connection_mode,
            ))),
            "cpu_percentage" => Ok(Arc::new(CpuRunner::from_args(args)?)),
            "storage" => Ok(Arc::new(DriveSizeRunner::from_args(args, self.drive_size_worker()?)?)),
            other => Err(CheckError::UnknownNativeCheck(other.to_string())),
        }
    }
}

impl CheckBuilder for DefaultCheckBuilder {
    fn build(&self, identity: &CheckIdentity, ctx: &BuildContext<'_>) -> Result<Arc<dyn CheckRunner>, CheckError> {
        let command_line = &identity.command_line;
        if !NativeCommand::looks_native(command_line) {
            return Ok(Arc::new(ExecRunner::new(command_line)?));
        }

        let built = NativeCommand::parse(command_line).and_then(|native| self.build_native(&native, ctx));
        match built {
            Ok(runner) => {
                debug!("native check {} built for {}", runner.kind(), identity.service);
                Ok(runner)
            }
            Err(e) => {
                error!("unable to build native check {}: {}", command_line, e);
                Ok(Arc::new(DummyRunner::native(command_line, &e.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{RunContext, Status};
    use crate::statistics::CheckStatistics;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn identity(command_line: &str) -> CheckIdentity {
        CheckIdentity {
            host: "host_1".into(),
            service: "svc".into(),
            command_name: "cmd".into(),
            command_line: command_line.into(),
            check_interval: Duration::from_secs(60),
        }
    }

    fn build(command_line: &str) -> Result<Arc<dyn CheckRunner>, CheckError> {
        let builder = DefaultCheckBuilder::new(ConnectionMode::AgentInitiated);
        let conf = AgentConfiguration::default();
        let statistics = CheckStatistics::shared();
        builder.build(&identity(command_line), &BuildContext { conf: &conf, statistics: &statistics })
    }

    #[test]
    fn test_dispatch_by_command_line() {
        assert_eq!(build("/usr/bin/true").unwrap().kind(), "exec");
        assert_eq!(build(r#"{"check":"health"}"#).unwrap().kind(), "health");
        assert_eq!(build(r#"{"check":"cpu_percentage","args":{}}"#).unwrap().kind(), "cpu_percentage");
        assert_eq!(build(r#"{"check":"storage","args":{"unit":"%"}}"#).unwrap().kind(), "storage");
        assert!(build("echo 'unterminated").is_err());
    }

    #[tokio::test]
    async fn test_bad_native_commands_become_failing_stubs() {
        for command_line in [
            r#"{"check":"unknown_native"}"#,
            r#"{"check":"storage","args":{"filter-fs":"(bad"}}"#,
            r#"{"check":"health","args":{"warning-runtime":"later"}}"#,
            "{broken json",
        ] {
            let runner = build(command_line).unwrap();
            assert_eq!(runner.kind(), "dummy");

            let (_tx, rx) = oneshot::channel();
            let result = runner
                .run(RunContext {
                    running_index: 1,
                    timeout: Duration::from_secs(1),
                    check_interval: Duration::from_secs(60),
                    terminate: rx,
                })
                .await;
            assert_eq!(result.status, Status::Critical);
            assert!(result
                .first_output()
                .unwrap()
                .starts_with(&format!("unable to execute native check {} , output error : ", command_line)));
        }
    }
}
