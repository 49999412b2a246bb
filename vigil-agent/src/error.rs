//! Error types shared across the agent
//!
//! Library modules return these typed errors; the binary wraps them with
//! `anyhow::Context` at the top level.

use thiserror::Error;

/// Errors raised while turning a configured command into a runnable check.
///
/// These never abort a configuration update: the scheduler reports them
/// through a permanently failing stub check instead.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("unknown native check '{0}'")]
    UnknownNativeCheck(String),

    #[error("malformed native check description: {0}")]
    MalformedNative(#[from] serde_json::Error),

    #[error("invalid value for argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("invalid regex for argument '{name}': {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid command line: {0}")]
    CommandLine(#[from] shell_words::ParseError),
}

impl CheckError {
    pub fn invalid_argument(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the duplex stream transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed by peer")]
    Closed,
}

/// Errors raised while loading the agent process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not find config directory")]
    NoConfigDir,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
