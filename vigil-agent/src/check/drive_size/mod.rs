//! Storage native check
//!
//! Arguments:
//! - `unit` (or `units`): `%` (default) for percent thresholds, anything else for bytes
//! - `free`: thresholds apply to free space instead of used space
//! - `warning`, `critical`: thresholds, `0` or absent to disable
//! - `filter-storage-type`/`filter-type`, `filter-fs`, `exclude-fs`,
//!   `filter-mountpoint`, `exclude-mountpoint`: see [`filter::Filter`]

pub mod filter;
pub mod worker;

use super::args::NativeArgs;
use super::{CheckResult, CheckRunner, RunContext, Status};
use crate::error::CheckError;
use crate::perfdata::PerfData;
use async_trait::async_trait;
use filter::{Filter, FsType};
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::{DiskKind, Disks};
use worker::DriveSizeWorker;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsStat {
    pub fs: String,
    pub mount_point: String,
    pub used: u64,
    pub total: u64,
}

impl FsStat {
    pub fn new(fs: &str, mount_point: &str, used: u64, total: u64) -> Self {
        Self {
            fs: fs.to_string(),
            mount_point: mount_point.to_string(),
            used,
            total,
        }
    }

    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }

    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 * 100.0 / self.total as f64
    }

    pub fn free_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.free() as f64 * 100.0 / self.total as f64
    }
}

/// Source of filesystem statistics. Called from the worker thread only.
pub trait FsStatsProvider: Send + Sync + 'static {
    fn fs_stats(&self, filter: &mut Filter) -> Vec<FsStat>;
}

/// Mounted disks as reported by sysinfo.
#[derive(Debug, Default)]
pub struct SysinfoFsStats;

impl FsStatsProvider for SysinfoFsStats {
    fn fs_stats(&self, filter: &mut Filter) -> Vec<FsStat> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter_map(|disk| {
                let fs = disk.name().to_string_lossy();
                let mount_point = disk.mount_point().to_string_lossy();
                let storage = if disk.is_removable() {
                    FsType::STORAGE_REMOVABLE_DISK
                } else if matches!(disk.kind(), DiskKind::Unknown(_)) {
                    FsType::UNKNOWN
                } else {
                    FsType::STORAGE_FIXED_DISK
                };
                let fs_type = storage | FsType::from_fs_name(&disk.file_system().to_string_lossy());
                if !filter.is_allowed(&fs, &mount_point, fs_type) {
                    return None;
                }
                let total = disk.total_space();
                Some(FsStat::new(
                    &fs,
                    &mount_point,
                    total.saturating_sub(disk.available_space()),
                    total,
                ))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveSizeSettings {
    pub percent: bool,
    pub free: bool,
    pub warning: Option<f64>,
    pub critical: Option<f64>,
}

impl DriveSizeSettings {
    pub fn from_args(args: NativeArgs<'_>) -> Result<Self, CheckError> {
        let unit = match args.string("unit")? {
            Some(unit) => Some(unit),
            None => args.string("units")?,
        };
        let positive = |v: Option<f64>| v.filter(|v| *v > 0.0);
        Ok(Self {
            percent: unit.map_or(true, |u| u == "%"),
            free: args.bool("free")?.unwrap_or(false),
            warning: positive(args.f64("warning")?),
            critical: positive(args.f64("critical")?),
        })
    }

    fn status_of(&self, fs: &FsStat) -> Status {
        let exceeds = |threshold: f64| match (self.percent, self.free) {
            (true, false) => fs.used_percent() >= threshold,
            (true, true) => fs.free_percent() < threshold,
            (false, false) => fs.used as f64 >= threshold,
            (false, true) => (fs.free() as f64) < threshold,
        };
        if self.critical.is_some_and(exceeds) {
            Status::Critical
        } else if self.warning.is_some_and(exceeds) {
            Status::Warning
        } else {
            Status::Ok
        }
    }

    pub fn evaluate(&self, stats: &[FsStat]) -> CheckResult {
        let mut status = Status::Ok;
        let mut entries = Vec::new();
        let mut perfdata = Vec::with_capacity(stats.len());

        for fs in stats {
            let fs_status = self.status_of(fs);
            status = status.max(fs_status);
            if fs_status != Status::Ok {
                let detail = if self.percent {
                    format!(
                        "{} Total: {}G Used: {:.2}% Free: {:.2}%",
                        fs.mount_point,
                        fs.total / GIB,
                        fs.used_percent(),
                        fs.free_percent()
                    )
                } else {
                    format!(
                        "{} Total: {}G Used: {}G Free: {}G",
                        fs.mount_point,
                        fs.total / GIB,
                        fs.used / GIB,
                        fs.free() / GIB
                    )
                };
                entries.push(format!("{}{}", fs_status.label(), detail));
            }

            let name = format!("{}{}", if self.free { "free_" } else { "used_" }, fs.mount_point);
            let mut perf = if self.percent {
                let value = if self.free { fs.free_percent() } else { fs.used_percent() };
                let mut perf = PerfData::new(name, value).with_unit("%");
                perf.max = Some(100.0);
                perf
            } else {
                let value = if self.free { fs.free() } else { fs.used };
                let mut perf = PerfData::new(name, value as f64).with_unit("B");
                perf.max = Some(fs.total as f64);
                perf
            };
            perf.min = Some(0.0);
            if let Some(warning) = self.warning {
                perf.warning_low = Some(0.0);
                perf.warning = Some(warning);
            }
            if let Some(critical) = self.critical {
                perf.critical_low = Some(0.0);
                perf.critical = Some(critical);
            }
            perfdata.push(perf);
        }

        let output = if !entries.is_empty() {
            entries.join(" ")
        } else if perfdata.is_empty() {
            status = Status::Critical;
            "No storage found (filters issue)".to_string()
        } else {
            "OK: All storages are ok".to_string()
        };
        CheckResult::new(status, perfdata, vec![output])
    }
}

pub struct DriveSizeRunner {
    settings: DriveSizeSettings,
    filter: Arc<Mutex<Filter>>,
    worker: Arc<DriveSizeWorker>,
}

impl DriveSizeRunner {
    pub fn from_args(args: NativeArgs<'_>, worker: Arc<DriveSizeWorker>) -> Result<Self, CheckError> {
        Ok(Self {
            settings: DriveSizeSettings::from_args(args)?,
            filter: Arc::new(Mutex::new(Filter::from_args(args)?)),
            worker,
        })
    }
}

#[async_trait]
impl CheckRunner for DriveSizeRunner {
    fn kind(&self) -> &'static str {
        "storage"
    }

    async fn run(&self, ctx: RunContext) -> CheckResult {
        match self.worker.fs_stats(Arc::clone(&self.filter), ctx.timeout).await {
            Some(stats) => self.settings.evaluate(&stats),
            None => CheckResult::single(Status::Unknown, "storage statistics unavailable"),
        }
    }
}
