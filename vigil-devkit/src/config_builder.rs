/*!
Builder de configurations poussées par le moteur

Évite d'écrire à la main les structures `AgentConfiguration` dans les tests.
*/

use serde_json::Value;
use vigil_agent::protocol::{AgentConfiguration, HostServices, ServiceDefinition};

/// Construit une `AgentConfiguration` service par service
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    conf: AgentConfiguration,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            conf: AgentConfiguration {
                hosts: Vec::new(),
                ..AgentConfiguration::default()
            },
        }
    }

    pub fn check_interval(mut self, secs: u32) -> Self {
        self.conf.check_interval = secs;
        self
    }

    pub fn export_period(mut self, secs: u32) -> Self {
        self.conf.export_period = secs;
        self
    }

    pub fn max_concurrent_checks(mut self, max: u32) -> Self {
        self.conf.max_concurrent_checks = max;
        self
    }

    pub fn check_timeout(mut self, secs: u32) -> Self {
        self.conf.check_timeout = secs;
        self
    }

    /// Ajoute un service exécuté comme processus externe
    pub fn service(mut self, host: &str, service: &str, command_line: &str) -> Self {
        let definition = ServiceDefinition {
            service: service.to_string(),
            command_name: format!("{}_{}", host, service),
            command_line: command_line.to_string(),
            check_interval: None,
        };
        match self.conf.hosts.iter_mut().find(|h| h.host == host) {
            Some(entry) => entry.services.push(definition),
            None => self.conf.hosts.push(HostServices {
                host: host.to_string(),
                services: vec![definition],
            }),
        }
        self
    }

    /// Ajoute un check natif (`{"check": ..., "args": ...}`)
    pub fn native(self, host: &str, service: &str, check: &str, args: Value) -> Self {
        let command_line = native_command(check, args);
        self.service(host, service, &command_line)
    }

    pub fn build(self) -> AgentConfiguration {
        self.conf
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Ligne de commande d'un check natif
pub fn native_command(check: &str, args: Value) -> String {
    serde_json::json!({ "check": check, "args": args }).to_string()
}
