//! Scheduled checks
//!
//! A [`Check`] couples a configured service with its schedule and with a
//! [`CheckRunner`] that knows how to produce a [`CheckResult`]:
//! - `exec`: external plugin processes
//! - `health`, `cpu_percentage`, `storage`: native checks
//! - `dummy`: stand-in for commands that could not be built
//!
//! Runs are spawned as tasks that post their outcome back to the scheduler
//! as [`CheckEvent`]s. The check accepts an outcome only if it belongs to the
//! run currently in flight, so late completions and post-timeout results are
//! discarded here.

pub mod args;
pub mod cpu;
pub mod drive_size;
pub mod dummy;
pub mod exec;
pub mod health;

use crate::perfdata::PerfData;
use crate::protocol::AgentConfiguration;
use crate::statistics::SharedStatistics;
use crate::time_step::TimeStep;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Plugin status, numerically ordered from best to worst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

impl Status {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Plugin exit code convention; anything out of 0..=3 is unknown.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Status::Ok,
            1 => Status::Warning,
            2 => Status::Critical,
            _ => Status::Unknown,
        }
    }

    /// Output prefix, e.g. `"WARNING: "`.
    pub fn label(self) -> &'static str {
        match self {
            Status::Ok => "OK: ",
            Status::Warning => "WARNING: ",
            Status::Critical => "CRITICAL: ",
            Status::Unknown => "UNKNOWN: ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub status: Status,
    pub perfdata: Vec<PerfData>,
    pub outputs: Vec<String>,
}

impl CheckResult {
    pub fn new(status: Status, perfdata: Vec<PerfData>, outputs: Vec<String>) -> Self {
        Self {
            status,
            perfdata,
            outputs,
        }
    }

    /// Result with a single output line and no perfdata.
    pub fn single(status: Status, output: impl Into<String>) -> Self {
        Self::new(status, Vec::new(), vec![output.into()])
    }

    pub fn first_output(&self) -> Option<&str> {
        self.outputs.first().map(String::as_str)
    }
}

/// What makes a check unique within a configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckIdentity {
    pub host: String,
    pub service: String,
    pub command_name: String,
    pub command_line: String,
    pub check_interval: Duration,
}

/// Everything a runner gets for one run.
pub struct RunContext {
    pub running_index: u64,
    pub timeout: Duration,
    pub check_interval: Duration,
    /// Fires when the scheduler gave up on this run (timeout or removal).
    /// A dropped sender means the scheduler went away, not a termination.
    pub terminate: oneshot::Receiver<()>,
}

impl RunContext {
    /// Resolves only on an explicit termination request.
    pub async fn terminated(&mut self) {
        if (&mut self.terminate).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A check variant: produces one result per run.
#[async_trait]
pub trait CheckRunner: Send + Sync + 'static {
    /// Short variant name used in logs.
    fn kind(&self) -> &'static str;

    async fn run(&self, ctx: RunContext) -> CheckResult;
}

pub type CheckKey = u64;

/// Outcome of a run, posted back to the scheduler's event loop.
#[derive(Debug)]
pub enum CheckEvent {
    Completed {
        key: CheckKey,
        running_index: u64,
        result: CheckResult,
    },
    TimedOut {
        key: CheckKey,
        running_index: u64,
    },
}

pub type CheckEventSender = mpsc::UnboundedSender<CheckEvent>;

pub struct Check {
    key: CheckKey,
    identity: CheckIdentity,
    conf: Arc<AgentConfiguration>,
    runner: Arc<dyn CheckRunner>,
    time_step: TimeStep,
    running: bool,
    running_index: u64,
    last_start: Option<Instant>,
    previous_start: Option<Instant>,
    last_start_wall: DateTime<Utc>,
    timeout_timer: Option<AbortHandle>,
    terminate: Option<oneshot::Sender<()>>,
    statistics: SharedStatistics,
    events: CheckEventSender,
}

impl Check {
    pub fn new(
        key: CheckKey,
        identity: CheckIdentity,
        first_start: Instant,
        conf: Arc<AgentConfiguration>,
        runner: Arc<dyn CheckRunner>,
        statistics: SharedStatistics,
        events: CheckEventSender,
    ) -> Self {
        let time_step = TimeStep::new(first_start, identity.check_interval);
        Self {
            key,
            identity,
            conf,
            runner,
            time_step,
            running: false,
            running_index: 0,
            last_start: None,
            previous_start: None,
            last_start_wall: Utc::now(),
            timeout_timer: None,
            terminate: None,
            statistics,
            events,
        }
    }

    pub fn key(&self) -> CheckKey {
        self.key
    }

    pub fn identity(&self) -> &CheckIdentity {
        &self.identity
    }

    pub fn conf(&self) -> &Arc<AgentConfiguration> {
        &self.conf
    }

    /// Rebind to a new configuration snapshot after an update that kept it.
    pub fn set_conf(&mut self, conf: Arc<AgentConfiguration>) {
        self.conf = conf;
    }

    pub fn start_expected(&self) -> Instant {
        self.time_step.value()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn running_index(&self) -> u64 {
        self.running_index
    }

    pub fn last_start_wall(&self) -> DateTime<Utc> {
        self.last_start_wall
    }

    /// Launch a run. Returns `false` without doing anything if a run is
    /// already in flight.
    pub fn start(&mut self, timeout: Duration) -> bool {
        if self.running {
            debug!(
                "check {}/{} already running, start ignored",
                self.identity.host, self.identity.service
            );
            return false;
        }

        let now = Instant::now();
        self.running = true;
        self.running_index += 1;
        self.previous_start = self.last_start.replace(now);
        self.last_start_wall = Utc::now();

        let (terminate_tx, terminate_rx) = oneshot::channel();
        self.terminate = Some(terminate_tx);

        let key = self.key;
        let running_index = self.running_index;

        let events = self.events.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(CheckEvent::TimedOut { key, running_index });
        });
        self.timeout_timer = Some(timer.abort_handle());

        trace!(
            "start {} check {}/{} run #{}",
            self.runner.kind(),
            self.identity.host,
            self.identity.service,
            running_index
        );

        let ctx = RunContext {
            running_index,
            timeout,
            check_interval: self.identity.check_interval,
            terminate: terminate_rx,
        };
        let runner = Arc::clone(&self.runner);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = runner.run(ctx).await;
            let _ = events.send(CheckEvent::Completed {
                key,
                running_index,
                result,
            });
        });
        true
    }

    /// Accept the outcome of run `running_index`.
    ///
    /// Returns the result to publish, or `None` when the outcome is stale
    /// (no run in flight, or a different run). Accepted outcomes advance the
    /// schedule by one step, catching up with the clock if behind.
    pub fn on_completion(&mut self, running_index: u64, result: CheckResult) -> Option<CheckResult> {
        if !self.running || running_index != self.running_index {
            trace!(
                "stale completion #{} for {}/{} dropped (current #{}, running {})",
                running_index,
                self.identity.host,
                self.identity.service,
                self.running_index,
                self.running
            );
            return None;
        }

        if let Some(timer) = self.timeout_timer.take() {
            timer.abort();
        }
        self.terminate = None;
        self.running = false;

        let now = Instant::now();
        self.time_step.advance_past(now);

        let mut stats = self.statistics.lock();
        if let Some(started) = self.last_start {
            stats.add_duration_stat(&self.identity.command_name, now - started);
            if let Some(previous) = self.previous_start {
                stats.add_interval_stat(&self.identity.command_name, started - previous);
            }
        }
        drop(stats);

        Some(result)
    }

    /// The run `running_index` exceeded its timeout: terminate it and
    /// complete with an unknown status.
    pub fn on_timeout(&mut self, running_index: u64) -> Option<CheckResult> {
        if !self.running || running_index != self.running_index {
            return None;
        }
        warn!(
            "check {}/{} timed out: {}",
            self.identity.host, self.identity.service, self.identity.command_line
        );
        self.timeout_timer = None;
        if let Some(terminate) = self.terminate.take() {
            let _ = terminate.send(());
        }
        let result = CheckResult::single(
            Status::Unknown,
            format!("Timeout at execution of {}", self.identity.command_line),
        );
        self.on_completion(running_index, result)
    }

    /// Give up on the run in flight, if any. Its outcome will be ignored.
    pub fn abandon(&mut self) {
        if !self.running {
            return;
        }
        if let Some(timer) = self.timeout_timer.take() {
            timer.abort();
        }
        if let Some(terminate) = self.terminate.take() {
            let _ = terminate.send(());
        }
        self.running = false;
    }
}

impl Drop for Check {
    fn drop(&mut self) {
        if let Some(timer) = self.timeout_timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::statistics::CheckStatistics;
    use parking_lot::Mutex;

    /// Runner completing after `delay` with a fixed result, recording starts.
    pub(crate) struct TestRunner {
        pub delay: Duration,
        pub result: CheckResult,
        pub starts: Arc<Mutex<Vec<Instant>>>,
    }

    impl TestRunner {
        pub(crate) fn new(delay: Duration) -> Self {
            Self {
                delay,
                result: CheckResult::single(Status::Ok, "OK - test"),
                starts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl CheckRunner for TestRunner {
        fn kind(&self) -> &'static str {
            "test"
        }

        async fn run(&self, _ctx: RunContext) -> CheckResult {
            self.starts.lock().push(Instant::now());
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    pub(crate) fn identity(service: &str, interval: Duration) -> CheckIdentity {
        CheckIdentity {
            host: "host_1".into(),
            service: service.into(),
            command_name: format!("command_{}", service),
            command_line: "/usr/bin/true".into(),
            check_interval: interval,
        }
    }

    fn make_check(runner: Arc<dyn CheckRunner>) -> (Check, mpsc::UnboundedReceiver<CheckEvent>, SharedStatistics) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = CheckStatistics::shared();
        let check = Check::new(
            1,
            identity("svc", Duration::from_secs(10)),
            Instant::now(),
            Arc::new(AgentConfiguration::default()),
            runner,
            stats.clone(),
            tx,
        );
        (check, rx, stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_noop() {
        let (mut check, _rx, _) = make_check(Arc::new(TestRunner::new(Duration::from_secs(1))));
        assert!(check.start(Duration::from_secs(5)));
        let index = check.running_index();
        assert!(!check.start(Duration::from_secs(5)));
        assert_eq!(check.running_index(), index);
        assert!(check.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_advances_one_step() {
        let (mut check, mut rx, stats) = make_check(Arc::new(TestRunner::new(Duration::from_millis(100))));
        let first = check.start_expected();
        check.start(Duration::from_secs(5));

        let CheckEvent::Completed { running_index, result, .. } = rx.recv().await.unwrap() else {
            panic!("expected a completion");
        };
        let accepted = check.on_completion(running_index, result).unwrap();
        assert_eq!(accepted.status, Status::Ok);
        assert!(!check.is_running());
        assert_eq!(check.start_expected(), first + Duration::from_secs(10));

        let stat = stats.lock().get("command_svc").cloned().unwrap();
        assert_eq!(stat.last_check_duration, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_completion_is_discarded() {
        let (mut check, _rx, stats) = make_check(Arc::new(TestRunner::new(Duration::from_secs(1))));
        let expected = check.start_expected();

        // nothing in flight
        assert!(check
            .on_completion(0, CheckResult::single(Status::Ok, "late"))
            .is_none());

        check.start(Duration::from_secs(5));
        let current = check.running_index();
        assert!(check
            .on_completion(current + 1, CheckResult::single(Status::Ok, "other run"))
            .is_none());

        assert!(check.is_running());
        assert_eq!(check.start_expected(), expected);
        assert!(stats.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_completes_unknown_and_drops_late_result() {
        let (mut check, mut rx, _) = make_check(Arc::new(TestRunner::new(Duration::from_millis(1500))));
        check.start(Duration::from_secs(1));

        let CheckEvent::TimedOut { running_index, .. } = rx.recv().await.unwrap() else {
            panic!("expected a timeout first");
        };
        let result = check.on_timeout(running_index).unwrap();
        assert_eq!(result.status, Status::Unknown);
        assert_eq!(
            result.first_output(),
            Some("Timeout at execution of /usr/bin/true")
        );

        let CheckEvent::Completed { running_index, result, .. } = rx.recv().await.unwrap() else {
            panic!("expected the late completion");
        };
        assert!(check.on_completion(running_index, result).is_none());
    }

    #[test]
    fn test_status_from_exit_code() {
        assert_eq!(Status::from_exit_code(0), Status::Ok);
        assert_eq!(Status::from_exit_code(1), Status::Warning);
        assert_eq!(Status::from_exit_code(2), Status::Critical);
        assert_eq!(Status::from_exit_code(3), Status::Unknown);
        assert_eq!(Status::from_exit_code(127), Status::Unknown);
        assert_eq!(Status::from_exit_code(-1), Status::Unknown);
        assert!(Status::Critical > Status::Warning);
    }
}
