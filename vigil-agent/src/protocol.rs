//! Messages exchanged with the monitoring engine
//!
//! Both directions are JSON documents carried in length-delimited frames
//! (see [`crate::streaming::codec`]).

use crate::check::CheckIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const DEFAULT_CHECK_INTERVAL_SECS: u32 = 60;
const DEFAULT_EXPORT_PERIOD_SECS: u32 = 60;
const DEFAULT_MAX_CONCURRENT_CHECKS: u32 = 10;
const DEFAULT_CHECK_TIMEOUT_SECS: u32 = 30;

/// Incoming messages tell the transport whether they carry anything worth
/// handing to the owner. Keep-alives and empty envelopes are dropped.
pub trait Dispatchable {
    fn is_dispatchable(&self) -> bool;
}

/// Engine → agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageToAgent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AgentConfiguration>,
}

impl MessageToAgent {
    pub fn with_config(config: AgentConfiguration) -> Self {
        Self {
            config: Some(config),
        }
    }
}

impl Dispatchable for MessageToAgent {
    fn is_dispatchable(&self) -> bool {
        self.config.is_some()
    }
}

/// Configuration pushed by the engine. Zero values mean "use the default".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfiguration {
    pub check_interval: u32,
    pub export_period: u32,
    pub max_concurrent_checks: u32,
    pub check_timeout: u32,
    pub hosts: Vec<HostServices>,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL_SECS,
            export_period: DEFAULT_EXPORT_PERIOD_SECS,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            check_timeout: DEFAULT_CHECK_TIMEOUT_SECS,
            hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostServices {
    pub host: String,
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub service: String,
    pub command_name: String,
    pub command_line: String,
    /// Per-service override of the global check interval, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<u32>,
}

impl AgentConfiguration {
    /// Configuration used before the engine has pushed anything: no checks,
    /// metrics flushed every second.
    pub fn initial() -> Self {
        Self {
            export_period: 1,
            ..Self::default()
        }
    }

    /// Replace zero values with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.check_interval == 0 {
            self.check_interval = DEFAULT_CHECK_INTERVAL_SECS;
        }
        if self.export_period == 0 {
            self.export_period = DEFAULT_EXPORT_PERIOD_SECS;
        }
        if self.max_concurrent_checks == 0 {
            self.max_concurrent_checks = DEFAULT_MAX_CONCURRENT_CHECKS;
        }
        if self.check_timeout == 0 {
            self.check_timeout = DEFAULT_CHECK_TIMEOUT_SECS;
        }
        self
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.check_interval))
    }

    pub fn export_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.export_period))
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.check_timeout))
    }

    pub fn max_concurrent_checks(&self) -> usize {
        self.max_concurrent_checks as usize
    }

    /// Every scheduled check, deduplicated, in a stable order.
    pub fn identities(&self) -> Vec<CheckIdentity> {
        let mut unique = BTreeSet::new();
        for host in &self.hosts {
            for service in &host.services {
                let interval = service
                    .check_interval
                    .filter(|secs| *secs > 0)
                    .map(|secs| Duration::from_secs(u64::from(secs)))
                    .unwrap_or_else(|| self.check_interval());
                unique.insert(CheckIdentity {
                    host: host.host.clone(),
                    service: service.service.clone(),
                    command_name: service.command_name.clone(),
                    command_line: service.command_line.clone(),
                    check_interval: interval,
                });
            }
        }
        unique.into_iter().collect()
    }

    pub fn command_names(&self) -> BTreeSet<&str> {
        self.hosts
            .iter()
            .flat_map(|h| h.services.iter().map(|s| s.command_name.as_str()))
            .collect()
    }
}

/// Agent → engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFromAgent {
    Init(AgentIdentification),
    Metrics(ExportMetrics),
}

impl Dispatchable for MessageFromAgent {
    fn is_dispatchable(&self) -> bool {
        match self {
            MessageFromAgent::Init(_) => true,
            MessageFromAgent::Metrics(export) => !export.resource_metrics.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Version of this build.
    pub fn current() -> Self {
        let mut parts = env!("CARGO_PKG_VERSION")
            .split('.')
            .map(|p| p.parse::<u32>().unwrap_or(0));
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Which side opened the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    AgentInitiated,
    PollerInitiated,
}

impl ConnectionMode {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionMode::AgentInitiated => "Agent initiated",
            ConnectionMode::PollerInitiated => "Poller initiated",
        }
    }
}

/// First message sent on every new stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentification {
    pub host: String,
    pub version: Version,
    pub os: String,
    pub os_version: String,
    pub connection_mode: ConnectionMode,
    #[serde(default)]
    pub encryption_self_test: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportMetrics {
    pub resource_metrics: Vec<ResourceMetrics>,
}

/// Metrics of one (host, service) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub host: String,
    pub service: String,
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    pub data_points: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub time_unix_nano: u64,
    pub start_time_unix_nano: u64,
    pub value: f64,
    #[serde(default)]
    pub value_type: crate::perfdata::ValueType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thresholds: Vec<Threshold>,
}

/// Threshold attached to a data point, labelled `crit_gt`, `warn_le`, `min`...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub label: String,
    pub value: f64,
}
