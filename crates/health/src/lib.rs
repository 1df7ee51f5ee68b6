//! Backend health checking.
//!
//! A [`HealthCheck`] probes a single node and always produces a verdict;
//! network failures of any kind count as unhealthy. The [`HealthMonitor`]
//! sweeps every registered node on a fixed interval, writes the verdicts
//! into the shared [`ferry_lb::NodeRegistry`] and evicts nodes that have
//! not passed a check for longer than the remove timeout.

pub mod checker;
pub mod monitor;

pub use checker::{CheckOutcome, HealthCheck, HttpCheck, PingCheck};
pub use monitor::{HealthMonitor, MonitorSettings, SweepReport};
