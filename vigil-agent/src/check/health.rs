//! Agent self-health native check
//!
//! Reports the longest runtime and interval observed among the scheduled
//! commands and flags the ones exceeding the configured thresholds.
//! Arguments (seconds, `0` or absent disables the threshold):
//! `warning-interval`, `critical-interval`, `warning-runtime`, `critical-runtime`.

use super::args::NativeArgs;
use super::{CheckResult, CheckRunner, RunContext, Status};
use crate::error::CheckError;
use crate::perfdata::PerfData;
use crate::protocol::{ConnectionMode, Version};
use crate::statistics::{CommandStat, SharedStatistics};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthThresholds {
    pub warning_interval: u64,
    pub critical_interval: u64,
    pub warning_runtime: u64,
    pub critical_runtime: u64,
}

impl HealthThresholds {
    pub fn from_args(args: NativeArgs<'_>) -> Result<Self, CheckError> {
        Ok(Self {
            warning_interval: args.u64("warning-interval")?.unwrap_or(0),
            critical_interval: args.u64("critical-interval")?.unwrap_or(0),
            warning_runtime: args.u64("warning-runtime")?.unwrap_or(0),
            critical_runtime: args.u64("critical-runtime")?.unwrap_or(0),
        })
    }
}

pub struct HealthRunner {
    thresholds: HealthThresholds,
    statistics: SharedStatistics,
    connection_mode: ConnectionMode,
}

impl HealthRunner {
    pub fn new(
        thresholds: HealthThresholds,
        statistics: SharedStatistics,
        connection_mode: ConnectionMode,
    ) -> Self {
        Self {
            thresholds,
            statistics,
            connection_mode,
        }
    }

    pub fn compute(&self) -> CheckResult {
        let stats = self.statistics.lock();
        if stats.is_empty() {
            return CheckResult::single(Status::Unknown, "UNKNOWN: No check yet performed");
        }

        let t = &self.thresholds;
        let mut report = Report::default();

        let mut critical = String::new();
        if t.critical_runtime > 0 {
            for stat in stats
                .ordered_by_duration()
                .rev()
                .take_while(|s| s.last_check_duration > secs(t.critical_runtime))
            {
                report.append(Status::Critical, &mut critical, stat);
            }
        }
        if t.critical_interval > 0 {
            for stat in stats
                .ordered_by_interval()
                .rev()
                .take_while(|s| s.last_check_interval > secs(t.critical_interval))
            {
                report.append(Status::Critical, &mut critical, stat);
            }
        }

        let mut warning = String::new();
        if t.warning_runtime > 0 {
            for stat in stats
                .ordered_by_duration()
                .rev()
                .take_while(|s| s.last_check_duration > secs(t.warning_runtime))
            {
                report.append(Status::Warning, &mut warning, stat);
            }
        }
        if t.warning_interval > 0 {
            for stat in stats
                .ordered_by_interval()
                .rev()
                .take_while(|s| s.last_check_interval > secs(t.warning_interval))
            {
                report.append(Status::Warning, &mut warning, stat);
            }
        }

        let max_interval = stats
            .ordered_by_interval()
            .next_back()
            .map(|s| s.last_check_interval.as_secs())
            .unwrap_or(0);
        let max_runtime = stats
            .ordered_by_duration()
            .next_back()
            .map(|s| s.last_check_duration.as_secs())
            .unwrap_or(0);
        let total_runtime: u64 = stats
            .ordered_by_duration()
            .map(|s| s.last_check_duration.as_secs())
            .sum();
        let count = stats.len() as u64;

        let mut interval_perf = PerfData::new("interval", max_interval as f64).with_unit("s");
        if t.warning_interval > 0 {
            interval_perf.warning_low = Some(0.0);
            interval_perf.warning = Some(t.warning_interval as f64);
        }
        if t.critical_interval > 0 {
            interval_perf.critical_low = Some(0.0);
            interval_perf.critical = Some(t.critical_interval as f64);
        }

        let mut runtime_perf = PerfData::new("runtime", max_runtime as f64).with_unit("s");
        if t.warning_runtime > 0 {
            runtime_perf.warning_low = Some(0.0);
            runtime_perf.warning = Some(t.warning_runtime as f64);
        }
        if t.critical_runtime > 0 {
            runtime_perf.critical_low = Some(0.0);
            runtime_perf.critical = Some(t.critical_runtime as f64);
        }

        let mut output = match (critical.is_empty(), warning.is_empty()) {
            (true, true) => Status::Ok.label().to_string(),
            (false, true) => format!("{} - ", critical),
            (true, false) => format!("{} - ", warning),
            (false, false) => format!("{} - {} - ", critical, warning),
        };
        output.push_str(&format!(
            "Version: {} - Connection mode: {} - Current configuration: {} checks - Average runtime: {}s",
            Version::current(),
            self.connection_mode.label(),
            count,
            total_runtime / count
        ));

        CheckResult::new(report.status, vec![interval_perf, runtime_perf], vec![output])
    }
}

/// Half the check interval, ending at least one second before the timeout.
fn settle_delay(ctx: &RunContext) -> Duration {
    (ctx.check_interval / 2).min(ctx.timeout.saturating_sub(Duration::from_secs(1)))
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

/// Each command is reported once, under the worst state found first.
#[derive(Default)]
struct Report {
    written: HashSet<String>,
    status: Status,
}

impl Report {
    fn append(&mut self, status: Status, output: &mut String, stat: &CommandStat) {
        if !self.written.insert(stat.command_name.clone()) {
            return;
        }
        if output.is_empty() {
            output.push_str(status.label());
        } else {
            output.push_str(", ");
        }
        if status > self.status {
            self.status = status;
        }
        output.push_str(&format!(
            "{} runtime:{}s interval:{}s",
            stat.command_name,
            stat.last_check_duration.as_secs(),
            stat.last_check_interval.as_secs()
        ));
    }
}

#[async_trait]
impl CheckRunner for HealthRunner {
    fn kind(&self) -> &'static str {
        "health"
    }

    /// Waits half an interval so the statistics reflect the current schedule.
    async fn run(&self, ctx: RunContext) -> CheckResult {
        tokio::time::sleep(settle_delay(&ctx)).await;
        self.compute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::args::NativeCommand;
    use crate::statistics::CheckStatistics;

    fn stats() -> SharedStatistics {
        let stats = CheckStatistics::shared();
        {
            let mut s = stats.lock();
            s.add_interval_stat("command1", Duration::from_secs(10));
            s.add_duration_stat("command1", Duration::from_secs(20));
            s.add_interval_stat("command2", Duration::from_secs(15));
            s.add_duration_stat("command2", Duration::from_secs(25));
        }
        stats
    }

    fn runner(args: &str, mode: ConnectionMode) -> HealthRunner {
        let cmd = NativeCommand::parse(&format!(r#"{{"check":"health","args":{}}}"#, args)).unwrap();
        HealthRunner::new(HealthThresholds::from_args(cmd.args()).unwrap(), stats(), mode)
    }

    fn suffix(mode: &str) -> String {
        format!(
            "Version: {} - Connection mode: {} - Current configuration: 2 checks - Average runtime: 22s",
            Version::current(),
            mode
        )
    }

    fn context(interval: u64, timeout: u64) -> RunContext {
        let (_terminate, terminate) = tokio::sync::oneshot::channel();
        RunContext {
            running_index: 1,
            timeout: secs(timeout),
            check_interval: secs(interval),
            terminate,
        }
    }

    #[test]
    fn test_settle_delay_ends_before_timeout() {
        assert_eq!(settle_delay(&context(20, 30)), secs(10));
        assert_eq!(settle_delay(&context(60, 30)), secs(29));
        assert_eq!(settle_delay(&context(600, 30)), secs(29));
        assert_eq!(settle_delay(&context(60, 1)), Duration::ZERO);
    }

    #[test]
    fn test_no_threshold() {
        let result = runner("{}", ConnectionMode::AgentInitiated).compute();
        assert_eq!(result.status, Status::Ok);
        assert_eq!(result.outputs[0], format!("OK: {}", suffix("Agent initiated")));
        assert_eq!(result.perfdata.len(), 2);
        for perf in &result.perfdata {
            assert_eq!(perf.unit, "s");
            assert_eq!(perf.warning, None);
            assert_eq!(perf.critical_low, None);
            match perf.name.as_str() {
                "runtime" => assert_eq!(perf.value, 25.0),
                "interval" => assert_eq!(perf.value, 15.0),
                other => panic!("unexpected perfdata {}", other),
            }
        }
    }

    #[test]
    fn test_empty_string_thresholds_are_unset() {
        let result = runner(
            r#"{"warning-interval":"","critical-interval":""}"#,
            ConnectionMode::PollerInitiated,
        )
        .compute();
        assert_eq!(result.status, Status::Ok);
        assert_eq!(result.outputs[0], format!("OK: {}", suffix("Poller initiated")));
    }

    #[test]
    fn test_interval_thresholds() {
        let result = runner(
            r#"{"warning-interval":"9","critical-interval":"14"}"#,
            ConnectionMode::PollerInitiated,
        )
        .compute();
        assert_eq!(result.status, Status::Critical);
        assert_eq!(
            result.outputs[0],
            format!(
                "CRITICAL: command2 runtime:25s interval:15s - WARNING: command1 runtime:20s interval:10s - {}",
                suffix("Poller initiated")
            )
        );
        let interval = result.perfdata.iter().find(|p| p.name == "interval").unwrap();
        assert_eq!(interval.warning_low, Some(0.0));
        assert_eq!(interval.warning, Some(9.0));
        assert_eq!(interval.critical, Some(14.0));
        let runtime = result.perfdata.iter().find(|p| p.name == "runtime").unwrap();
        assert_eq!(runtime.warning, None);
    }

    #[test]
    fn test_runtime_thresholds() {
        let result = runner(
            r#"{"warning-runtime":19,"critical-runtime":24}"#,
            ConnectionMode::AgentInitiated,
        )
        .compute();
        assert_eq!(result.status, Status::Critical);
        assert!(result.outputs[0].starts_with(
            "CRITICAL: command2 runtime:25s interval:15s - WARNING: command1 runtime:20s interval:10s - "
        ));
    }

    #[test]
    fn test_no_statistics_yet() {
        let runner = HealthRunner::new(
            HealthThresholds::default(),
            CheckStatistics::shared(),
            ConnectionMode::AgentInitiated,
        );
        let result = runner.compute();
        assert_eq!(result.status, Status::Unknown);
        assert_eq!(result.outputs[0], "UNKNOWN: No check yet performed");
        assert!(result.perfdata.is_empty());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let cmd = NativeCommand::parse(r#"{"check":"health","args":{"warning-runtime":"soon"}}"#).unwrap();
        assert!(HealthThresholds::from_args(cmd.args()).is_err());
    }
}
