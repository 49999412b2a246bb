//! CPU usage native check
//!
//! Two sysinfo samples are taken one second short of the timeout apart;
//! usage is reported per core and on average. Thresholds are percentages:
//! `warning-core`, `critical-core`, `warning-average`, `critical-average`.
//! With `cpu-detailed` every core usage is appended to the outputs.

use super::args::NativeArgs;
use super::{CheckResult, CheckRunner, RunContext, Status};
use crate::error::CheckError;
use crate::perfdata::PerfData;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use sysinfo::System;
use tracing::trace;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuThresholds {
    pub warning_core: Option<f64>,
    pub critical_core: Option<f64>,
    pub warning_average: Option<f64>,
    pub critical_average: Option<f64>,
}

/// Usage in percent, as measured over the sampling window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuSample {
    pub cores: Vec<f64>,
    pub average: f64,
}

/// Which CPU a status refers to. The average sorts after every core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CpuIndex {
    Core(usize),
    Average,
}

pub struct CpuRunner {
    thresholds: CpuThresholds,
    detailed: bool,
}

impl CpuRunner {
    pub fn from_args(args: NativeArgs<'_>) -> Result<Self, CheckError> {
        Ok(Self {
            thresholds: CpuThresholds {
                warning_core: args.f64("warning-core")?,
                critical_core: args.f64("critical-core")?,
                warning_average: args.f64("warning-average")?,
                critical_average: args.f64("critical-average")?,
            },
            detailed: args.bool("cpu-detailed")?.unwrap_or(false),
        })
    }

    async fn measure(window: Duration) -> CpuSample {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        tokio::time::sleep(window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
        sys.refresh_cpu_usage();

        CpuSample {
            cores: sys.cpus().iter().map(|c| f64::from(c.cpu_usage())).collect(),
            average: f64::from(sys.global_cpu_info().cpu_usage()),
        }
    }

    fn status_of(value: f64, warning: Option<f64>, critical: Option<f64>) -> Status {
        if critical.is_some_and(|c| value > c) {
            Status::Critical
        } else if warning.is_some_and(|w| value > w) {
            Status::Warning
        } else {
            Status::Ok
        }
    }

    pub fn evaluate(&self, sample: &CpuSample) -> CheckResult {
        let t = &self.thresholds;
        let mut statuses = BTreeMap::new();
        for (index, usage) in sample.cores.iter().enumerate() {
            statuses.insert(
                CpuIndex::Core(index),
                Self::status_of(*usage, t.warning_core, t.critical_core),
            );
        }
        statuses.insert(
            CpuIndex::Average,
            Self::status_of(sample.average, t.warning_average, t.critical_average),
        );

        let worst = statuses.values().copied().max().unwrap_or_default();
        let mut outputs = Vec::new();
        if worst == Status::Ok {
            outputs.push(format!(
                "OK: CPU(s) average usage is {:.2}%",
                sample.average
            ));
        } else {
            let line = statuses
                .iter()
                .filter(|(_, status)| **status != Status::Ok)
                .map(|(index, status)| format!("{}{}", status.label(), describe(*index, sample)))
                .collect::<Vec<_>>()
                .join(" ");
            outputs.push(line);
        }
        if self.detailed {
            outputs.extend(
                (0..sample.cores.len()).map(|i| describe(CpuIndex::Core(i), sample)),
            );
        }

        let mut perfdata: Vec<PerfData> = sample
            .cores
            .iter()
            .enumerate()
            .map(|(index, usage)| {
                let mut perf = percent_perf(format!("{}#core.cpu.utilization.percentage", index), *usage);
                perf.warning = t.warning_core;
                perf.critical = t.critical_core;
                perf
            })
            .collect();
        let mut average = percent_perf("cpu.utilization.percentage".to_string(), sample.average);
        average.warning = t.warning_average;
        average.critical = t.critical_average;
        perfdata.push(average);

        for perf in &mut perfdata {
            if perf.warning.is_some() {
                perf.warning_low = Some(0.0);
            }
            if perf.critical.is_some() {
                perf.critical_low = Some(0.0);
            }
        }

        trace!("cpu sample evaluated to {:?}", worst);
        CheckResult::new(worst, perfdata, outputs)
    }
}

fn describe(index: CpuIndex, sample: &CpuSample) -> String {
    match index {
        CpuIndex::Core(i) => format!(
            "CPU'{}' Usage: {:.2}%",
            i,
            sample.cores.get(i).copied().unwrap_or_default()
        ),
        CpuIndex::Average => format!("CPU(s) average Usage: {:.2}%", sample.average),
    }
}

fn percent_perf(name: String, value: f64) -> PerfData {
    let mut perf = PerfData::new(name, value).with_unit("%");
    perf.min = Some(0.0);
    perf.max = Some(100.0);
    perf
}

/// Time between the two samples: one second short of the timeout, or half
/// of it for timeouts of two seconds or less.
fn sample_window(timeout: Duration) -> Duration {
    let margin = (timeout / 2).min(Duration::from_secs(1));
    timeout.saturating_sub(margin)
}

#[async_trait]
impl CheckRunner for CpuRunner {
    fn kind(&self) -> &'static str {
        "cpu_percentage"
    }

    async fn run(&self, ctx: RunContext) -> CheckResult {
        let sample = Self::measure(sample_window(ctx.timeout)).await;
        self.evaluate(&sample)
    }
}
