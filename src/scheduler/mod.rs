//! Polling scheduler module.
//!
//! Drives the fetch-evaluate-dispatch cycle, adapts the polling interval to
//! the observed quota and reports its phase for health checks.

mod interval;
mod runner;
mod state;

pub use interval::IntervalPolicy;
pub use runner::{
    CycleOutcome, MonitorConfig, MonitorError, MonitorMessage, NotificationRecord, ProjectMonitor,
};
pub use state::{HealthHandle, HealthSnapshot, MonitorPhase, PersistentState};
