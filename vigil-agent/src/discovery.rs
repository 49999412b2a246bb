//! System identification for the agent
//!
//! Builds the identification message sent at the start of every stream:
//! host name, agent version, OS name and version.

use crate::protocol::{AgentIdentification, ConnectionMode, Version};
use sysinfo::System;
use tracing::info;

/// Machine hostname, lossily converted.
pub fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

pub fn identification(host: &str, connection_mode: ConnectionMode) -> AgentIdentification {
    let os = System::name().unwrap_or_else(|| std::env::consts::OS.to_string());
    let os_version = System::os_version().unwrap_or_default();

    info!(
        "Discovery complete - Host: {}, OS: {} {}, mode: {}",
        host,
        os,
        os_version,
        connection_mode.label()
    );

    AgentIdentification {
        host: host.to_string(),
        version: Version::current(),
        os,
        os_version,
        connection_mode,
        encryption_self_test: false,
    }
}
