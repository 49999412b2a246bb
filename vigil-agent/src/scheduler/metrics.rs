//! Metric aggregation between two exports
//!
//! Completions are grouped by (host, service). Within a group each metric
//! name appears once; later completions append data points to it.

use crate::check::{CheckIdentity, CheckResult};
use crate::perfdata::{split_output, PerfData, ValueType};
use crate::protocol::{DataPoint, ExportMetrics, Metric, ResourceMetrics, Threshold};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

struct ScopeBatch {
    resource: ResourceMetrics,
    by_name: HashMap<String, usize>,
}

impl ScopeBatch {
    fn metric(&mut self, name: &str, unit: &str, description: &str) -> &mut Metric {
        let index = match self.by_name.get(name) {
            Some(index) => *index,
            None => {
                self.resource.metrics.push(Metric {
                    name: name.to_string(),
                    unit: unit.to_string(),
                    description: description.to_string(),
                    data_points: Vec::new(),
                });
                let index = self.resource.metrics.len() - 1;
                self.by_name.insert(name.to_string(), index);
                index
            }
        };
        &mut self.resource.metrics[index]
    }
}

#[derive(Default)]
pub struct MetricsBatch {
    scopes: Vec<ScopeBatch>,
    by_resource: HashMap<(String, String), usize>,
}

impl MetricsBatch {
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Add one accepted completion: a `status` metric then one metric per perfdata.
    pub fn record(
        &mut self,
        identity: &CheckIdentity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        result: &CheckResult,
    ) {
        let start_nanos = unix_nanos(start);
        let end_nanos = unix_nanos(end);
        let scope = self.scope(&identity.host, &identity.service);

        let description = result
            .first_output()
            .map(|line| split_output(line).0.trim())
            .unwrap_or_default();
        let status = scope.metric("status", "", description);
        status.description = description.to_string();
        status.data_points.push(DataPoint {
            time_unix_nano: end_nanos,
            start_time_unix_nano: start_nanos,
            value: f64::from(result.status.code()),
            value_type: ValueType::Gauge,
            thresholds: Vec::new(),
        });

        for perf in &result.perfdata {
            let metric = scope.metric(&perf.name, &perf.unit, "");
            metric.data_points.push(DataPoint {
                time_unix_nano: end_nanos,
                start_time_unix_nano: start_nanos,
                value: perf.value,
                value_type: perf.value_type,
                thresholds: thresholds(perf),
            });
        }
    }

    fn scope(&mut self, host: &str, service: &str) -> &mut ScopeBatch {
        let key = (host.to_string(), service.to_string());
        let index = match self.by_resource.get(&key) {
            Some(index) => *index,
            None => {
                self.scopes.push(ScopeBatch {
                    resource: ResourceMetrics {
                        host: host.to_string(),
                        service: service.to_string(),
                        metrics: Vec::new(),
                    },
                    by_name: HashMap::new(),
                });
                self.by_resource.insert(key, self.scopes.len() - 1);
                self.scopes.len() - 1
            }
        };
        &mut self.scopes[index]
    }

    /// Hand over everything aggregated so far and start a new batch.
    pub fn take(&mut self) -> ExportMetrics {
        let batch = std::mem::take(self);
        ExportMetrics {
            resource_metrics: batch.scopes.into_iter().map(|s| s.resource).collect(),
        }
    }
}

fn unix_nanos(time: DateTime<Utc>) -> u64 {
    time.timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or_default()
}

fn thresholds(perf: &PerfData) -> Vec<Threshold> {
    let mut thresholds = Vec::new();
    let mut push = |label: &str, value: Option<f64>| {
        if let Some(value) = value.filter(|v| v.is_finite()) {
            thresholds.push(Threshold {
                label: label.to_string(),
                value,
            });
        }
    };

    if perf.critical_inverted {
        push("crit_ge", perf.critical);
        push("crit_le", perf.critical_low);
    } else {
        push("crit_gt", perf.critical);
        push("crit_lt", perf.critical_low);
    }
    if perf.warning_inverted {
        push("warn_ge", perf.warning);
        push("warn_le", perf.warning_low);
    } else {
        push("warn_gt", perf.warning);
        push("warn_lt", perf.warning_low);
    }
    push("min", perf.min);
    push("max", perf.max);
    thresholds
}
