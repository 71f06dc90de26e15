//! Monitor phase, health reporting and persisted position.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::ingest::Cursor;

/// Phases of one monitoring cycle, plus the terminal `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Idle,
    Fetching,
    Evaluating,
    Dispatching,
    Sleeping,
    Stopped,
}

impl fmt::Display for MonitorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Evaluating => "evaluating",
            Self::Dispatching => "dispatching",
            Self::Sleeping => "sleeping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the monitor for external health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub phase: MonitorPhase,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub cycles: u64,
    pub next_check_in_secs: Option<u64>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            phase: MonitorPhase::Idle,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            cycles: 0,
            next_check_in_secs: None,
        }
    }
}

/// Cloneable handle to the monitor's health, written by the monitor and read
/// by whoever serves health checks.
#[derive(Debug, Clone, Default)]
pub struct HealthHandle {
    inner: Arc<RwLock<HealthSnapshot>>,
}

impl HealthHandle {
    /// Creates a handle in the `Idle` phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current state.
    pub async fn snapshot(&self) -> HealthSnapshot {
        self.inner.read().await.clone()
    }

    /// Current phase.
    pub async fn phase(&self) -> MonitorPhase {
        self.inner.read().await.phase
    }

    /// Moves to `phase`; `Stopped` is terminal and never left.
    pub async fn set_phase(&self, phase: MonitorPhase) {
        let mut health = self.inner.write().await;
        if health.phase != MonitorPhase::Stopped {
            health.phase = phase;
        }
    }

    /// Enters `Sleeping` and records when the next check is due.
    pub async fn set_sleeping(&self, delay: Duration) {
        let mut health = self.inner.write().await;
        if health.phase != MonitorPhase::Stopped {
            health.phase = MonitorPhase::Sleeping;
            health.next_check_in_secs = Some(delay.as_secs());
        }
    }

    /// Records a completed fetch.
    pub async fn record_success(&self, at: DateTime<Utc>) {
        let mut health = self.inner.write().await;
        health.last_success = Some(at);
        health.consecutive_failures = 0;
        health.last_error = None;
        health.cycles += 1;
    }

    /// Records a failed fetch that will be retried.
    pub async fn record_failure(&self, reason: impl Into<String>) {
        let mut health = self.inner.write().await;
        health.last_error = Some(reason.into());
        health.consecutive_failures += 1;
        health.cycles += 1;
    }

    /// Enters the terminal `Stopped` phase.
    pub async fn set_stopped(&self, reason: impl Into<String>) {
        let mut health = self.inner.write().await;
        health.phase = MonitorPhase::Stopped;
        health.last_error = Some(reason.into());
        health.next_check_in_secs = None;
    }
}

/// Position that survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PersistentState {
    /// Cursor of the last successful fetch.
    #[serde(default)]
    pub cursor: Cursor,

    /// When the last fetch succeeded.
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
}

impl PersistentState {
    /// Loads state from a JSON file, returns default if missing or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Saves state to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await
    }
}
