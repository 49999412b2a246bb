//! Vigil Agent - host-resident monitoring agent
//!
//! Runs periodic checks pushed by a monitoring engine and streams their
//! results back:
//! - Drift-free check scheduling with a concurrency cap and timeouts
//! - External process checks and native checks (health, CPU, storage)
//! - Duplex length-delimited JSON stream, agent or engine initiated
//! - Metric batches flushed on a fixed export period

pub mod check;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod perfdata;
pub mod protocol;
pub mod scheduler;
pub mod statistics;
pub mod streaming;
pub mod time_step;
