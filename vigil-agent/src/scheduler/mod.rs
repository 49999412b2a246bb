//! Check scheduler
//!
//! One task owns every [`Check`], the ready queue and the metrics batch.
//! It reacts to four things:
//! - commands from [`SchedulerHandle`] (configuration update, status, stop)
//! - check events (completion or timeout of a run)
//! - the check timer, armed on the next expected start
//! - the send timer, armed every export period
//!
//! All state mutation happens on that task, so nothing here is locked
//! except the statistics shared with the health check.

pub mod builder;
pub mod metrics;

use crate::check::dummy::DummyRunner;
use crate::check::{Check, CheckEvent, CheckEventSender, CheckIdentity, CheckKey, CheckResult};
use crate::protocol::{AgentConfiguration, ExportMetrics};
use crate::statistics::{CheckStatistics, SharedStatistics};
use builder::{BuildContext, CheckBuilder};
use metrics::MetricsBatch;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace};

/// Delay before retrying due checks held back by the concurrency cap.
const CAP_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Check timer period when nothing is queued.
const IDLE_CHECK_DELAY: Duration = Duration::from_secs(1);

/// Receives every export batch. Called on the scheduler task.
pub type MetricSender = Box<dyn FnMut(ExportMetrics) + Send>;

enum Command {
    Update(AgentConfiguration),
    Status(oneshot::Sender<SchedulerStatus>),
    Stop,
}

/// Snapshot of the scheduler state, for supervision and tests.
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    /// Live checks, ordered by identity.
    pub checks: Vec<(CheckIdentity, CheckKey)>,
    pub active_checks: usize,
    pub queued: usize,
    pub export_period: Duration,
    pub max_concurrent_checks: usize,
}

impl SchedulerStatus {
    pub fn identities(&self) -> Vec<CheckIdentity> {
        self.checks.iter().map(|(identity, _)| identity.clone()).collect()
    }
}

#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    statistics: SharedStatistics,
}

impl SchedulerHandle {
    /// Replace the configuration. Returns `false` if the scheduler is gone.
    pub fn update(&self, conf: AgentConfiguration) -> bool {
        self.commands.send(Command::Update(conf)).is_ok()
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub async fn status(&self) -> Option<SchedulerStatus> {
        let (reply, status) = oneshot::channel();
        self.commands.send(Command::Status(reply)).ok()?;
        status.await.ok()
    }

    pub fn statistics(&self) -> &SharedStatistics {
        &self.statistics
    }
}

pub struct Scheduler {
    conf: Arc<AgentConfiguration>,
    builder: Arc<dyn CheckBuilder>,
    metric_sender: MetricSender,
    checks: HashMap<CheckKey, Check>,
    by_identity: HashMap<CheckIdentity, CheckKey>,
    queue: BTreeSet<(Instant, CheckKey)>,
    active_checks: usize,
    metrics: MetricsBatch,
    statistics: SharedStatistics,
    next_key: CheckKey,
    next_check: Instant,
    next_send: Instant,
    events: CheckEventSender,
}

impl Scheduler {
    /// Start a scheduler with the initial configuration (no checks).
    pub fn spawn(builder: Arc<dyn CheckBuilder>, metric_sender: MetricSender) -> (SchedulerHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let statistics = CheckStatistics::shared();
        let conf = Arc::new(AgentConfiguration::initial());
        let now = Instant::now();

        let scheduler = Self {
            next_check: now + IDLE_CHECK_DELAY,
            next_send: now + conf.export_period(),
            conf,
            builder,
            metric_sender,
            checks: HashMap::new(),
            by_identity: HashMap::new(),
            queue: BTreeSet::new(),
            active_checks: 0,
            metrics: MetricsBatch::default(),
            statistics: Arc::clone(&statistics),
            next_key: 1,
            events: events_tx,
        };
        let task = tokio::spawn(scheduler.run(commands_rx, events_rx));

        (
            SchedulerHandle {
                commands: commands_tx,
                statistics,
            },
            task,
        )
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut events: mpsc::UnboundedReceiver<CheckEvent>) {
        info!("scheduler started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Update(conf)) => self.update(conf),
                    Some(Command::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Some(Command::Stop) | None => break,
                },
                Some(event) = events.recv() => self.on_event(event),
                _ = sleep_until(self.next_check) => self.dispatch(),
                _ = sleep_until(self.next_send) => self.send_metrics(),
            }
        }
        info!(
            "scheduler stopped, {} checks dropped, {} still running",
            self.checks.len(),
            self.active_checks
        );
    }

    fn status(&self) -> SchedulerStatus {
        let mut checks: Vec<_> = self
            .by_identity
            .iter()
            .map(|(identity, key)| (identity.clone(), *key))
            .collect();
        checks.sort();
        SchedulerStatus {
            checks,
            active_checks: self.active_checks,
            queued: self.queue.len(),
            export_period: self.conf.export_period(),
            max_concurrent_checks: self.conf.max_concurrent_checks(),
        }
    }

    /// Reconcile the check set with `conf`. Checks are matched by
    /// identity: unchanged ones keep their schedule, removed ones are
    /// abandoned, new ones are spread over their check interval.
    fn update(&mut self, conf: AgentConfiguration) {
        let conf = conf.normalized();
        if *self.conf == conf {
            debug!("configuration unchanged");
            return;
        }
        let conf = Arc::new(conf);
        let identities = conf.identities();
        let now = Instant::now();

        let removed: Vec<CheckKey> = self
            .by_identity
            .iter()
            .filter(|(identity, _)| identities.binary_search(identity).is_err())
            .map(|(_, key)| *key)
            .collect();
        for key in removed {
            let Some(mut check) = self.checks.remove(&key) else {
                continue;
            };
            self.queue.remove(&(check.start_expected(), key));
            if check.is_running() {
                check.abandon();
                self.active_checks = self.active_checks.saturating_sub(1);
            }
            self.by_identity.remove(check.identity());
            debug!(
                service = %check.identity().service,
                command = %check.identity().command_name,
                "check removed"
            );
        }

        {
            let names = conf.command_names();
            self.statistics.lock().retain(|name| names.contains(name));
        }

        // running checks keep the snapshot they started with so that their
        // result is recognised as coming from a previous configuration
        for check in self.checks.values_mut() {
            if !check.is_running() {
                check.set_conf(Arc::clone(&conf));
            }
        }

        let added: Vec<CheckIdentity> = identities
            .into_iter()
            .filter(|identity| !self.by_identity.contains_key(identity))
            .collect();
        let count = added.len() as u32;
        for (i, identity) in added.into_iter().enumerate() {
            let first_start = now + identity.check_interval * i as u32 / count;
            self.add_check(identity, first_start, &conf);
        }

        let next_send = now + conf.export_period();
        if next_send < self.next_send {
            self.next_send = next_send;
        }
        self.conf = conf;
        info!(
            checks = self.checks.len(),
            max_concurrent_checks = self.conf.max_concurrent_checks(),
            "configuration applied"
        );
        self.dispatch();
    }

    fn add_check(&mut self, identity: CheckIdentity, first_start: Instant, conf: &Arc<AgentConfiguration>) {
        let ctx = BuildContext {
            conf,
            statistics: &self.statistics,
        };
        let runner = match self.builder.build(&identity, &ctx) {
            Ok(runner) => runner,
            Err(e) => {
                error!(
                    service = %identity.service,
                    "unable to build check {}: {}", identity.command_line, e
                );
                Arc::new(DummyRunner::exec(&identity.command_line, &e.to_string()))
            }
        };

        let key = self.next_key;
        self.next_key += 1;
        let check = Check::new(
            key,
            identity.clone(),
            first_start,
            Arc::clone(conf),
            runner,
            Arc::clone(&self.statistics),
            self.events.clone(),
        );
        self.queue.insert((check.start_expected(), key));
        self.checks.insert(key, check);
        self.by_identity.insert(identity, key);
    }

    /// Start every due check the concurrency cap allows, then re-arm.
    fn dispatch(&mut self) {
        let now = Instant::now();
        let cap = self.conf.max_concurrent_checks();
        let timeout = self.conf.check_timeout();

        while let Some(&(due, key)) = self.queue.first() {
            if due > now || self.active_checks >= cap {
                break;
            }
            self.queue.pop_first();
            let Some(check) = self.checks.get_mut(&key) else {
                continue;
            };
            if check.start(timeout) {
                self.active_checks += 1;
            }
        }

        self.next_check = match self.queue.first() {
            Some(&(due, _)) if due <= now => {
                trace!("{} checks due, concurrency cap {} reached", self.queue.len(), cap);
                now + CAP_RETRY_DELAY
            }
            Some(&(due, _)) => due,
            None => now + IDLE_CHECK_DELAY,
        };
    }

    fn on_event(&mut self, event: CheckEvent) {
        let (key, outcome) = match event {
            CheckEvent::Completed {
                key,
                running_index,
                result,
            } => (
                key,
                self.checks
                    .get_mut(&key)
                    .and_then(|check| check.on_completion(running_index, result)),
            ),
            CheckEvent::TimedOut { key, running_index } => (
                key,
                self.checks
                    .get_mut(&key)
                    .and_then(|check| check.on_timeout(running_index)),
            ),
        };
        let Some(result) = outcome else {
            return;
        };
        self.on_completion(key, result);
    }

    fn on_completion(&mut self, key: CheckKey, result: CheckResult) {
        self.active_checks = self.active_checks.saturating_sub(1);
        let Some(check) = self.checks.get_mut(&key) else {
            return;
        };

        if Arc::ptr_eq(check.conf(), &self.conf) {
            self.metrics
                .record(check.identity(), check.last_start_wall(), chrono::Utc::now(), &result);
        } else {
            debug!(
                service = %check.identity().service,
                "result from a previous configuration dropped"
            );
            check.set_conf(Arc::clone(&self.conf));
        }

        self.queue.insert((check.start_expected(), key));
        self.dispatch();
    }

    fn send_metrics(&mut self) {
        if !self.metrics.is_empty() {
            let export = self.metrics.take();
            trace!("sending metrics of {} resources", export.resource_metrics.len());
            (self.metric_sender)(export);
        }
        self.next_send = Instant::now() + self.conf.export_period();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::tests::TestRunner;
    use crate::check::{CheckRunner, RunContext, Status};
    use crate::error::CheckError;
    use crate::protocol::{HostServices, ServiceDefinition};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SharedRunnerBuilder(Arc<dyn CheckRunner>);

    impl CheckBuilder for SharedRunnerBuilder {
        fn build(&self, _: &CheckIdentity, _: &BuildContext<'_>) -> Result<Arc<dyn CheckRunner>, CheckError> {
            Ok(Arc::clone(&self.0))
        }
    }

    /// Tracks how many runs are in flight at once.
    #[derive(Default)]
    struct CountingRunner {
        delay: Duration,
        current: AtomicUsize,
        max: AtomicUsize,
        total: AtomicUsize,
    }

    #[async_trait]
    impl CheckRunner for CountingRunner {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn run(&self, _ctx: RunContext) -> CheckResult {
            let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(current, Ordering::SeqCst);
            self.total.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            CheckResult::single(Status::Ok, "OK")
        }
    }

    fn conf(services: &[&str], check_interval: u32) -> AgentConfiguration {
        AgentConfiguration {
            check_interval,
            hosts: vec![HostServices {
                host: "host_1".into(),
                services: services
                    .iter()
                    .map(|service| ServiceDefinition {
                        service: service.to_string(),
                        command_name: format!("command_{}", service),
                        command_line: format!("/usr/lib/nagios/plugins/check_{}", service),
                        check_interval: None,
                    })
                    .collect(),
            }],
            ..AgentConfiguration::default()
        }
    }

    fn collecting_sender() -> (MetricSender, Arc<Mutex<Vec<ExportMetrics>>>) {
        let exports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&exports);
        (Box::new(move |export| sink.lock().push(export)), exports)
    }

    fn key_of(status: &SchedulerStatus, service: &str) -> Option<CheckKey> {
        status.checks.iter().find(|(i, _)| i.service == service).map(|(_, k)| *k)
    }

    fn status_points(exports: &[ExportMetrics], service: &str) -> Vec<(f64, String)> {
        exports
            .iter()
            .flat_map(|e| e.resource_metrics.iter())
            .filter(|r| r.service == service)
            .flat_map(|r| r.metrics.iter())
            .filter(|m| m.name == "status")
            .flat_map(|m| m.data_points.iter().map(move |p| (p.value, m.description.clone())))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_checks_are_spread_over_the_interval() {
        let runner = Arc::new(TestRunner::new(Duration::ZERO));
        let starts = Arc::clone(&runner.starts);
        let (sender, _) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(SharedRunnerBuilder(runner)), sender);

        let services: Vec<String> = (0..20).map(|i| format!("svc_{:02}", i)).collect();
        let services: Vec<&str> = services.iter().map(String::as_str).collect();
        let t0 = Instant::now();
        assert!(handle.update(conf(&services, 1)));

        tokio::time::sleep(Duration::from_millis(990)).await;
        let starts = starts.lock().clone();
        assert_eq!(starts.len(), 20);
        for (i, start) in starts.iter().enumerate() {
            let offset = *start - t0;
            let expected = Duration::from_millis(50 * i as u64);
            assert!(
                offset >= expected && offset < expected + Duration::from_millis(2),
                "check {} started at {:?}",
                i,
                offset
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_is_never_exceeded() {
        let runner = Arc::new(CountingRunner {
            delay: Duration::from_secs(5),
            ..CountingRunner::default()
        });
        let (sender, _) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(SharedRunnerBuilder(runner.clone())), sender);

        let services: Vec<String> = (0..200).map(|i| format!("svc_{:03}", i)).collect();
        let services: Vec<&str> = services.iter().map(String::as_str).collect();
        let mut conf = conf(&services, 60);
        conf.max_concurrent_checks = 10;
        handle.update(conf);

        for _ in 0..13 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let status = handle.status().await.unwrap();
            assert!(status.active_checks <= 10);
        }
        assert_eq!(runner.max.load(Ordering::SeqCst), 10);
        assert!(runner.total.load(Ordering::SeqCst) > 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_exported_as_unknown() {
        let runner = Arc::new(TestRunner::new(Duration::from_secs(10)));
        let (sender, exports) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(SharedRunnerBuilder(runner)), sender);

        let mut conf = conf(&["slow"], 60);
        conf.check_timeout = 1;
        conf.export_period = 2;
        handle.update(conf);

        tokio::time::sleep(Duration::from_secs(15)).await;
        let points = status_points(&exports.lock(), "slow");
        assert_eq!(
            points,
            vec![(3.0, "Timeout at execution of /usr/lib/nagios/plugins/check_slow".to_string())]
        );
        assert_eq!(handle.status().await.unwrap().active_checks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_reconciles_check_set() {
        let runner = Arc::new(TestRunner::new(Duration::from_millis(10)));
        let (sender, _) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(SharedRunnerBuilder(runner)), sender);

        let first = conf(&["cpu", "disk", "ping"], 5);
        handle.update(first.clone());
        let status = handle.status().await.unwrap();
        assert_eq!(status.identities(), first.identities());

        // same configuration twice: no churn
        handle.update(first.clone());
        let again = handle.status().await.unwrap();
        assert_eq!(again.checks, status.checks);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(handle.statistics().lock().get("command_cpu").is_some());

        let second = conf(&["disk", "ping", "load"], 5);
        handle.update(second.clone());
        let updated = handle.status().await.unwrap();
        assert_eq!(updated.identities(), second.identities());
        assert_eq!(key_of(&updated, "disk"), key_of(&status, "disk"));
        assert!(key_of(&updated, "cpu").is_none());
        assert!(handle.statistics().lock().get("command_cpu").is_none());
        assert!(handle.statistics().lock().get("command_disk").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_command_line_is_a_new_check() {
        let runner = Arc::new(TestRunner::new(Duration::ZERO));
        let (sender, _) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(SharedRunnerBuilder(runner)), sender);

        let mut conf = conf(&["ping"], 5);
        handle.update(conf.clone());
        let before = handle.status().await.unwrap();

        conf.hosts[0].services[0].command_line = "/usr/lib/nagios/plugins/check_ping -H 10.0.0.1".into();
        handle.update(conf);
        let after = handle.status().await.unwrap();
        assert_eq!(after.checks.len(), 1);
        assert_ne!(after.checks[0].1, before.checks[0].1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_running_check_frees_its_slot() {
        let runner = Arc::new(TestRunner::new(Duration::from_secs(20)));
        let starts = Arc::clone(&runner.starts);
        let (sender, _) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(SharedRunnerBuilder(runner)), sender);

        let mut both = conf(&["a", "b"], 2);
        both.max_concurrent_checks = 1;
        handle.update(both);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(starts.lock().len(), 1);
        assert_eq!(handle.status().await.unwrap().active_checks, 1);

        let mut only_b = conf(&["b"], 2);
        only_b.max_concurrent_checks = 1;
        handle.update(only_b);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(starts.lock().len(), 2);
        assert_eq!(handle.status().await.unwrap().active_checks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_builder_error_is_isolated_to_its_check() {
        let good: Arc<dyn CheckRunner> = Arc::new(TestRunner::new(Duration::ZERO));
        let builder = move |identity: &CheckIdentity, _: &BuildContext<'_>| -> Result<Arc<dyn CheckRunner>, CheckError> {
            if identity.service == "bad" {
                Err(CheckError::UnknownNativeCheck("bad".into()))
            } else {
                Ok(Arc::clone(&good))
            }
        };
        let (sender, exports) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(builder), sender);

        let mut conf = conf(&["bad", "good"], 10);
        conf.export_period = 1;
        handle.update(conf);
        tokio::time::sleep(Duration::from_secs(8)).await;

        let exports = exports.lock();
        let bad = status_points(&exports, "bad");
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].0, 2.0);
        assert!(bad[0].1.starts_with("Fail to execute /usr/lib/nagios/plugins/check_bad : "));
        assert_eq!(status_points(&exports, "good"), vec![(0.0, "OK - test".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_of_previous_configuration_is_dropped() {
        let runner = Arc::new(TestRunner::new(Duration::from_secs(3)));
        let starts = Arc::clone(&runner.starts);
        let (sender, exports) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(SharedRunnerBuilder(runner)), sender);

        let mut conf = conf(&["slow"], 10);
        conf.export_period = 1;
        handle.update(conf.clone());
        let before = handle.status().await.unwrap();

        // only the export period changes while the first run is in flight
        tokio::time::sleep(Duration::from_secs(1)).await;
        conf.export_period = 2;
        assert!(handle.update(conf));
        let after = handle.status().await.unwrap();
        assert_eq!(key_of(&after, "slow"), key_of(&before, "slow"));
        assert_eq!(after.active_checks, 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(status_points(&exports.lock(), "slow").is_empty());
        assert_eq!(handle.status().await.unwrap().active_checks, 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(status_points(&exports.lock(), "slow"), vec![(0.0, "OK - test".to_string())]);
        assert_eq!(starts.lock().len(), 2);
        assert_eq!(handle.status().await.unwrap().active_checks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_reports_under_default_configuration() {
        let builder = builder::DefaultCheckBuilder::new(crate::protocol::ConnectionMode::AgentInitiated);
        let (sender, exports) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(builder), sender);

        let conf = AgentConfiguration {
            export_period: 5,
            hosts: vec![HostServices {
                host: "host_1".into(),
                services: vec![ServiceDefinition {
                    service: "health".into(),
                    command_name: "command_health".into(),
                    command_line: r#"{"check":"health"}"#.into(),
                    check_interval: None,
                }],
            }],
            ..AgentConfiguration::default()
        };
        handle.update(conf);
        tokio::time::sleep(Duration::from_secs(200)).await;

        let points = status_points(&exports.lock(), "health");
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|(_, output)| !output.starts_with("Timeout")));
        assert_eq!(points[0], (3.0, "UNKNOWN: No check yet performed".to_string()));
        for (status, output) in &points[1..] {
            assert_eq!(*status, 0.0);
            assert!(output.starts_with("OK: Version: "));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparsable_exec_command_reports_exec_failure() {
        let builder = builder::DefaultCheckBuilder::new(crate::protocol::ConnectionMode::AgentInitiated);
        let (sender, exports) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(builder), sender);

        let mut conf = conf(&["ping"], 10);
        conf.export_period = 1;
        conf.hosts[0].services[0].command_line = r#"check_ping -H "10.0.0.1"#.into();
        handle.update(conf);
        tokio::time::sleep(Duration::from_secs(3)).await;

        let points = status_points(&exports.lock(), "ping");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].0, 2.0);
        assert!(points[0].1.starts_with(r#"Fail to execute check_ping -H "10.0.0.1 : "#));
        assert!(!points[0].1.contains("native check"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exports_group_by_resource_and_reset() {
        let runner = Arc::new(TestRunner::new(Duration::ZERO));
        let (sender, exports) = collecting_sender();
        let (handle, _task) = Scheduler::spawn(Arc::new(SharedRunnerBuilder(runner)), sender);

        let mut conf = conf(&["cpu", "disk"], 2);
        conf.export_period = 10;
        // the initial one second export period is still armed at t0 + 1s
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.update(conf);
        tokio::time::sleep(Duration::from_millis(10_700)).await;

        let exports = exports.lock();
        assert_eq!(exports.len(), 2);
        let first = &exports[0].resource_metrics;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].service, "cpu");
        assert_eq!(first[0].metrics[0].data_points.len(), 1);

        let second = &exports[1].resource_metrics;
        assert_eq!(second.len(), 2);
        for resource in second {
            assert_eq!(resource.host, "host_1");
            assert_eq!(resource.metrics.len(), 1);
            assert_eq!(resource.metrics[0].data_points.len(), 5);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_the_task() {
        let runner = Arc::new(TestRunner::new(Duration::ZERO));
        let (sender, _) = collecting_sender();
        let (handle, task) = Scheduler::spawn(Arc::new(SharedRunnerBuilder(runner)), sender);
        handle.update(conf(&["ping"], 1));
        handle.stop();
        task.await.unwrap();
        assert!(handle.status().await.is_none());
        assert!(!handle.update(conf(&["ping"], 1)));
    }
}
