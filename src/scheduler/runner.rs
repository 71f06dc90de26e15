//! Project monitor loop.
//!
//! One cycle:
//! 1. Fetch from the source with the current cursor
//! 2. On throttled/transient → widen the interval, keep the cursor, stop here
//! 3. On fatal → enter `Stopped` and return an error
//! 4. Mark every returned project seen; only newly marked ones go on
//! 5. Persist the new cursor
//! 6. Evaluate open projects against active profiles
//! 7. Queue matches for the dispatcher
//! 8. Prune old seen markers, adapt the interval to the remaining quota
//!
//! Marking happens before evaluation, so a crash mid-cycle loses
//! notifications rather than duplicating them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use super::{HealthHandle, IntervalPolicy, MonitorPhase, PersistentState};
use crate::config::MonitorSettings;
use crate::error::ErrorKind;
use crate::filter;
use crate::ingest::{Cursor, FetchBatch, FetchOutcome, ProjectSource};
use crate::model::{FilterProfile, Project, UserId};
use crate::ratelimit::SharedRateLimit;
use crate::store::{ProfileStore, SeenStore};

/// Messages that can be sent to the monitor.
#[derive(Debug, Clone)]
pub enum MonitorMessage {
    /// Cut the current sleep short and run a cycle now.
    CheckNow,
    /// Stop the monitor.
    Shutdown,
}

/// Conditions that end the monitor loop.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Project source failed permanently: {0}")]
    SourceFailed(String),

    #[error("Notification dispatcher is no longer running")]
    DispatcherGone,
}

/// A (user, project) match in transit to the dispatcher.
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub user_id: UserId,
    pub project: Arc<Project>,
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed {
        fetched: usize,
        fresh: usize,
        queued: usize,
    },
    BackedOff {
        kind: ErrorKind,
    },
}

/// Tuning of the monitor loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub policy: IntervalPolicy,
    /// Seen markers older than this are pruned.
    pub seen_retention: TimeDelta,
    /// Minimum wall-clock time between two prunes.
    pub prune_every: Duration,
    /// Where cursor and last success are persisted; `None` keeps them in memory.
    pub state_path: Option<PathBuf>,
}

impl MonitorConfig {
    /// Builds the monitor tuning from settings.
    #[must_use]
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self {
            policy: IntervalPolicy::from_settings(settings),
            seen_retention: TimeDelta::days(i64::from(settings.seen_retention_days)),
            prune_every: Duration::from_secs(3600),
            state_path: Some(settings.state_path.clone()),
        }
    }
}

/// Polls a [`ProjectSource`] and queues matching projects for delivery.
pub struct ProjectMonitor {
    source: Arc<dyn ProjectSource>,
    seen: Arc<dyn SeenStore>,
    profiles: Arc<dyn ProfileStore>,
    notify_tx: mpsc::Sender<NotificationRecord>,
    rate_limit: SharedRateLimit,
    health: HealthHandle,
    config: MonitorConfig,
    cursor: Mutex<Cursor>,
    last_prune: Mutex<Option<Instant>>,
}

impl ProjectMonitor {
    /// Creates a monitor, restoring the cursor from the state file if any.
    #[must_use]
    pub fn new(
        source: Arc<dyn ProjectSource>,
        seen: Arc<dyn SeenStore>,
        profiles: Arc<dyn ProfileStore>,
        notify_tx: mpsc::Sender<NotificationRecord>,
        rate_limit: SharedRateLimit,
        config: MonitorConfig,
    ) -> Self {
        let cursor = config
            .state_path
            .as_ref()
            .map(PersistentState::load)
            .unwrap_or_default()
            .cursor;

        if let Some(since) = cursor.since {
            info!("Resuming from cursor {}", since);
        }

        Self {
            source,
            seen,
            profiles,
            notify_tx,
            rate_limit,
            health: HealthHandle::new(),
            config,
            cursor: Mutex::new(cursor),
            last_prune: Mutex::new(None),
        }
    }

    /// Handle for health checks.
    #[must_use]
    pub fn health(&self) -> HealthHandle {
        self.health.clone()
    }

    /// Cursor the next fetch will use.
    pub async fn cursor(&self) -> Cursor {
        self.cursor.lock().await.clone()
    }

    /// Runs cycles until shutdown or a fatal source error.
    ///
    /// # Errors
    ///
    /// Returns an error when the source fails permanently or the dispatcher
    /// stopped accepting records.
    pub async fn run(&self, mut rx: mpsc::Receiver<MonitorMessage>) -> Result<(), MonitorError> {
        info!("Project monitor started ({} source)", self.source.name());

        loop {
            self.run_cycle().await?;

            let delay = self.rate_limit.read().await.interval();
            self.health.set_sleeping(delay).await;
            debug!("Next check in {:?}", delay);

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                msg = rx.recv() => {
                    match msg {
                        Some(MonitorMessage::CheckNow) => {
                            debug!("Received check-now message");
                        }
                        Some(MonitorMessage::Shutdown) | None => {
                            info!("Project monitor shutting down");
                            self.health.set_stopped("shutdown requested").await;
                            return Ok(());
                        }
                    }
                }
            }

            self.health.set_phase(MonitorPhase::Idle).await;
        }
    }

    /// Runs a single fetch-evaluate-dispatch cycle.
    ///
    /// # Errors
    ///
    /// Returns an error when the source fails permanently or the dispatcher
    /// stopped accepting records; the health handle is `Stopped` afterwards.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, MonitorError> {
        // Nothing may be marked seen once no one can deliver it.
        if self.notify_tx.is_closed() {
            return Err(self.dispatcher_gone().await);
        }

        self.health.set_phase(MonitorPhase::Fetching).await;
        let cursor = self.cursor().await;

        let batch = match self.source.fetch_new_projects(&cursor).await {
            FetchOutcome::Fetched(batch) => batch,
            FetchOutcome::Throttled { retry_after } => {
                return Ok(self
                    .back_off(ErrorKind::Throttled, retry_after, "rate limited")
                    .await);
            }
            FetchOutcome::Transient { reason } => {
                return Ok(self.back_off(ErrorKind::Transient, None, &reason).await);
            }
            FetchOutcome::Fatal { reason } => {
                error!("Stopping monitor, {} source failed: {}", self.source.name(), reason);
                self.health.set_stopped(reason.clone()).await;
                return Err(MonitorError::SourceFailed(reason));
            }
        };

        self.health.set_phase(MonitorPhase::Evaluating).await;
        let profiles = match self.profiles.active_profiles().await {
            Ok(profiles) => profiles,
            Err(e) => {
                return Ok(self
                    .back_off(ErrorKind::Transient, None, &format!("loading profiles: {e}"))
                    .await);
            }
        };

        let now = Utc::now();
        let fetched = batch.projects.len();
        let FetchBatch {
            projects,
            next_cursor,
        } = batch;

        let fresh = match self.mark_fresh(projects, now).await {
            Ok(fresh) => fresh,
            Err(reason) => {
                return Ok(self.back_off(ErrorKind::Transient, None, &reason).await);
            }
        };

        self.commit_cursor(next_cursor, now).await;
        self.health.record_success(now).await;

        let records = evaluate(&fresh, &profiles);

        self.health.set_phase(MonitorPhase::Dispatching).await;
        let queued = records.len();
        for record in records {
            if self.notify_tx.send(record).await.is_err() {
                return Err(self.dispatcher_gone().await);
            }
        }

        info!(
            "Cycle done: {} fetched, {} new, {} notifications queued for {} profiles",
            fetched,
            fresh.len(),
            queued,
            profiles.len()
        );

        self.prune_if_due(now).await;
        self.adapt_interval(now).await;

        Ok(CycleOutcome::Completed {
            fetched,
            fresh: fresh.len(),
            queued,
        })
    }

    async fn dispatcher_gone(&self) -> MonitorError {
        error!("Notification queue closed, stopping monitor");
        self.health.set_stopped("notification dispatcher stopped").await;
        MonitorError::DispatcherGone
    }

    /// Marks every project seen and keeps the ones this call marked first.
    async fn mark_fresh(
        &self,
        projects: Vec<Project>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Arc<Project>>, String> {
        let ids: Vec<_> = projects.iter().map(|p| p.id.clone()).collect();
        let marked = self
            .seen
            .mark_all_seen(&ids, now)
            .await
            .map_err(|e| format!("marking {} projects seen: {e}", ids.len()))?;

        let fresh = projects
            .into_iter()
            .zip(marked)
            .filter_map(|(project, is_new)| {
                if is_new {
                    Some(Arc::new(project))
                } else {
                    debug!("Skipping already seen project {}", project.id);
                    None
                }
            })
            .collect();

        Ok(fresh)
    }

    async fn commit_cursor(&self, next: Cursor, now: DateTime<Utc>) {
        let mut cursor = self.cursor.lock().await;
        *cursor = next;

        if let Some(ref path) = self.config.state_path {
            let state = PersistentState {
                cursor: cursor.clone(),
                last_success: Some(now),
            };
            if let Err(e) = state.save(path).await {
                warn!("Failed to save monitor state: {}", e);
            }
        }
    }

    async fn back_off(
        &self,
        kind: ErrorKind,
        retry_after: Option<Duration>,
        reason: &str,
    ) -> CycleOutcome {
        self.health.record_failure(format!("{kind}: {reason}")).await;

        let mut rate_limit = self.rate_limit.write().await;
        let hint = match kind {
            ErrorKind::Throttled => retry_after.or_else(|| rate_limit.time_until_reset(Utc::now())),
            _ => retry_after,
        };
        let current = rate_limit.interval();
        let next = self.config.policy.after_failure(current, hint);
        rate_limit.set_interval(next);

        warn!(
            "Fetch {} ({}), retrying same cursor in {:?}",
            kind, reason, next
        );

        CycleOutcome::BackedOff { kind }
    }

    async fn adapt_interval(&self, now: DateTime<Utc>) {
        let mut rate_limit = self.rate_limit.write().await;
        let current = rate_limit.interval();
        let next = self
            .config
            .policy
            .after_success(current, rate_limit.effective_remaining(now));

        if next != current {
            info!(
                "Check interval {:?} -> {:?} ({})",
                current,
                next,
                rate_limit.status_line()
            );
        }
        rate_limit.set_interval(next);
    }

    async fn prune_if_due(&self, now: DateTime<Utc>) {
        let mut last_prune = self.last_prune.lock().await;
        if last_prune.is_some_and(|at| at.elapsed() < self.config.prune_every) {
            return;
        }
        *last_prune = Some(Instant::now());

        match self.seen.prune(now - self.config.seen_retention).await {
            Ok(0) => {}
            Ok(removed) => info!("Pruned {} old seen markers", removed),
            Err(e) => warn!("Failed to prune seen markers: {}", e),
        }
    }
}

/// Pairs every open project with every profile it matches.
fn evaluate(
    projects: &[Arc<Project>],
    profiles: &[FilterProfile],
) -> Vec<NotificationRecord> {
    let mut records = Vec::new();

    for project in projects {
        if !project.is_open {
            debug!("Project {} is not open for proposals", project.id);
            continue;
        }
        for profile in profiles {
            match filter::check(project, profile) {
                Ok(()) => records.push(NotificationRecord {
                    user_id: profile.user_id,
                    project: Arc::clone(project),
                }),
                Err(reason) => debug!(
                    "Project {} skipped for user {}: {}",
                    project.id, profile.user_id, reason
                ),
            }
        }
    }

    records
}

impl std::fmt::Debug for ProjectMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectMonitor")
            .field("source", &self.source.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::config::ProfileBook;
    use crate::notify::{BotApiError, DeliveryOutcome, Dispatcher, DispatcherConfig, MessageSender};
    use crate::ratelimit::{self, RateLimitHeaders};
    use crate::store::{JsonProfileStore, JsonSeenStore};

    /// Source replaying scripted outcomes and recording the cursors it got.
    #[derive(Default)]
    struct ScriptedSource {
        outcomes: StdMutex<VecDeque<FetchOutcome>>,
        cursors: StdMutex<Vec<Cursor>>,
    }

    impl ScriptedSource {
        fn new(outcomes: impl IntoIterator<Item = FetchOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: StdMutex::new(outcomes.into_iter().collect()),
                cursors: StdMutex::default(),
            })
        }

        fn idle() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn cursors(&self) -> Vec<Cursor> {
            self.cursors.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProjectSource for ScriptedSource {
        async fn fetch_new_projects(&self, cursor: &Cursor) -> FetchOutcome {
            self.cursors.lock().unwrap().push(cursor.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| fetched(cursor, vec![]))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn fetched(cursor: &Cursor, projects: Vec<Project>) -> FetchOutcome {
        let next_cursor = cursor.advanced_past(&projects);
        FetchOutcome::Fetched(FetchBatch {
            projects,
            next_cursor,
        })
    }

    fn design_project(id: &str, posted_at: DateTime<Utc>) -> Project {
        Project::new(id, format!("Logo {id}"), posted_at)
            .with_category("design")
            .with_budget(500.0, "UAH")
            .with_skills(["logo"])
    }

    fn design_profile(user_id: UserId) -> FilterProfile {
        FilterProfile::new(user_id)
            .with_categories(["design"])
            .with_budget(Some(100.0), Some(1000.0))
            .with_required_skills(["logo"])
    }

    fn config(state_path: Option<PathBuf>) -> MonitorConfig {
        MonitorConfig {
            state_path,
            ..MonitorConfig::from_settings(&MonitorSettings::default())
        }
    }

    struct Harness {
        monitor: ProjectMonitor,
        seen: Arc<JsonSeenStore>,
        profiles: Arc<JsonProfileStore>,
        rate_limit: SharedRateLimit,
        records: mpsc::Receiver<NotificationRecord>,
    }

    fn harness(source: Arc<ScriptedSource>, profiles: Vec<FilterProfile>) -> Harness {
        let seen = Arc::new(JsonSeenStore::in_memory());
        let profiles = Arc::new(JsonProfileStore::in_memory(ProfileBook { profiles }));
        let rate_limit = ratelimit::shared(Duration::from_secs(60));
        let (tx, records) = mpsc::channel(64);

        let monitor = ProjectMonitor::new(
            source,
            seen.clone(),
            profiles.clone(),
            tx,
            rate_limit.clone(),
            config(None),
        );

        Harness {
            monitor,
            seen,
            profiles,
            rate_limit,
            records,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<NotificationRecord>) -> Vec<(UserId, String)> {
        let mut out = Vec::new();
        while let Ok(record) = rx.try_recv() {
            out.push((record.user_id, record.project.id.to_string()));
        }
        out
    }

    #[tokio::test]
    async fn test_matching_project_is_queued() {
        let t0 = Utc::now();
        let source = ScriptedSource::new([fetched(
            &Cursor::start(),
            vec![design_project("p1", t0)],
        )]);
        let mut h = harness(
            source,
            vec![
                design_profile(1),
                design_profile(2).with_budget(None, Some(100.0)),
            ],
        );

        let outcome = h.monitor.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                fetched: 1,
                fresh: 1,
                queued: 1
            }
        );
        assert_eq!(drain(&mut h.records), vec![(1, "p1".to_owned())]);
        assert_eq!(h.monitor.cursor().await, Cursor::at(t0));

        let health = h.monitor.health().snapshot().await;
        assert_eq!(health.phase, MonitorPhase::Dispatching);
        assert!(health.last_success.is_some());
    }

    #[tokio::test]
    async fn test_overlapping_window_is_not_reevaluated() {
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::seconds(30);
        let source = ScriptedSource::new([
            fetched(&Cursor::start(), vec![design_project("p1", t0)]),
            fetched(
                &Cursor::at(t0),
                vec![design_project("p1", t0), design_project("p2", t1)],
            ),
        ]);
        let mut h = harness(source.clone(), vec![design_profile(1)]);

        h.monitor.run_cycle().await.unwrap();
        let outcome = h.monitor.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                fetched: 2,
                fresh: 1,
                queued: 1
            }
        );
        assert_eq!(
            drain(&mut h.records),
            vec![(1, "p1".to_owned()), (1, "p2".to_owned())]
        );
        assert_eq!(source.cursors()[1], Cursor::at(t0));
    }

    #[tokio::test]
    async fn test_throttled_keeps_cursor_and_widens_interval() {
        let t0 = Utc::now();
        let source = ScriptedSource::new([
            fetched(&Cursor::start(), vec![design_project("p1", t0)]),
            FetchOutcome::Throttled { retry_after: None },
        ]);
        let mut h = harness(source.clone(), vec![design_profile(1)]);

        h.monitor.run_cycle().await.unwrap();
        drain(&mut h.records);
        let interval_before = h.rate_limit.read().await.interval();
        h.rate_limit.write().await.record(
            RateLimitHeaders {
                limit: Some(300),
                remaining: Some(2),
                reset_after: None,
            },
            Utc::now(),
        );

        let outcome = h.monitor.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::BackedOff {
                kind: ErrorKind::Throttled
            }
        );

        let interval_after = h.rate_limit.read().await.interval();
        assert!(interval_after > interval_before);
        assert!(interval_after <= Duration::from_secs(3600));
        assert_eq!(h.monitor.cursor().await, Cursor::at(t0));
        assert_eq!(h.seen.len().await, 1);
        assert!(drain(&mut h.records).is_empty());

        // The retry uses the same cursor.
        h.monitor.run_cycle().await.unwrap();
        let cursors = source.cursors();
        assert_eq!(cursors[1], cursors[2]);
    }

    #[tokio::test]
    async fn test_throttled_first_cycle_marks_nothing() {
        let source = ScriptedSource::new([FetchOutcome::Throttled {
            retry_after: Some(Duration::from_secs(600)),
        }]);
        let h = harness(source, vec![design_profile(1)]);

        h.monitor.run_cycle().await.unwrap();

        assert!(h.seen.is_empty().await);
        assert_eq!(h.monitor.cursor().await, Cursor::start());
        assert_eq!(h.rate_limit.read().await.interval(), Duration::from_secs(600));
        assert_eq!(h.monitor.health().snapshot().await.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_backs_off() {
        let source = ScriptedSource::new([FetchOutcome::Transient {
            reason: "HTTP 502".to_owned(),
        }]);
        let h = harness(source, vec![]);

        let outcome = h.monitor.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::BackedOff {
                kind: ErrorKind::Transient
            }
        );
        assert_eq!(h.rate_limit.read().await.interval(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_fatal_stops_monitor() {
        let source = ScriptedSource::new([FetchOutcome::Fatal {
            reason: "HTTP 401".to_owned(),
        }]);
        let h = harness(source, vec![design_profile(1)]);

        let (_tx, rx) = mpsc::channel(1);
        let result = h.monitor.run(rx).await;

        assert!(matches!(result, Err(MonitorError::SourceFailed(_))));
        let health = h.monitor.health().snapshot().await;
        assert_eq!(health.phase, MonitorPhase::Stopped);
        assert_eq!(health.last_error.as_deref(), Some("HTTP 401"));
    }

    #[tokio::test]
    async fn test_deactivated_user_is_never_matched_again() {
        let t0 = Utc::now();
        let source = ScriptedSource::new([
            fetched(&Cursor::start(), vec![design_project("p1", t0)]),
            fetched(
                &Cursor::at(t0),
                vec![design_project("p2", t0 + TimeDelta::seconds(5))],
            ),
        ]);
        let mut h = harness(source, vec![design_profile(1), design_profile(2)]);

        h.monitor.run_cycle().await.unwrap();
        assert_eq!(drain(&mut h.records).len(), 2);

        h.profiles.deactivate(1).await.unwrap();
        h.monitor.run_cycle().await.unwrap();

        assert_eq!(drain(&mut h.records), vec![(2, "p2".to_owned())]);
    }

    #[tokio::test]
    async fn test_closed_project_is_marked_but_not_evaluated() {
        let mut closed = design_project("p1", Utc::now());
        closed.is_open = false;
        let source = ScriptedSource::new([fetched(&Cursor::start(), vec![closed])]);
        let mut h = harness(source, vec![design_profile(1)]);

        h.monitor.run_cycle().await.unwrap();

        assert!(h.seen.is_seen(&"p1".into()).await.unwrap());
        assert!(drain(&mut h.records).is_empty());
    }

    #[tokio::test]
    async fn test_no_profiles_still_marks_seen() {
        let source = ScriptedSource::new([fetched(
            &Cursor::start(),
            vec![design_project("p1", Utc::now())],
        )]);
        let h = harness(source, vec![]);

        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.seen.len().await, 1);
    }

    #[tokio::test]
    async fn test_low_quota_widens_interval_after_success() {
        let source = ScriptedSource::idle();
        let h = harness(source, vec![]);
        h.rate_limit.write().await.record(
            RateLimitHeaders {
                limit: Some(300),
                remaining: Some(5),
                reset_after: Some(Duration::from_secs(600)),
            },
            Utc::now(),
        );

        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.rate_limit.read().await.interval(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_dispatcher_gone_stops_monitor() {
        let source = ScriptedSource::new([fetched(
            &Cursor::start(),
            vec![design_project("p1", Utc::now())],
        )]);
        let h = harness(source, vec![design_profile(1)]);
        drop(h.records);

        let result = h.monitor.run_cycle().await;
        assert!(matches!(result, Err(MonitorError::DispatcherGone)));
        assert_eq!(h.monitor.health().phase().await, MonitorPhase::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_message_ends_loop() {
        let h = harness(ScriptedSource::idle(), vec![]);
        let (tx, rx) = mpsc::channel(4);
        tx.send(MonitorMessage::Shutdown).await.unwrap();

        assert!(h.monitor.run(rx).await.is_ok());
        assert_eq!(h.monitor.health().phase().await, MonitorPhase::Stopped);
    }

    #[tokio::test]
    async fn test_cursor_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let t0 = Utc::now();

        {
            let source = ScriptedSource::new([fetched(
                &Cursor::start(),
                vec![design_project("p1", t0)],
            )]);
            let (tx, _rx) = mpsc::channel(8);
            let monitor = ProjectMonitor::new(
                source,
                Arc::new(JsonSeenStore::in_memory()),
                Arc::new(JsonProfileStore::in_memory(ProfileBook::default())),
                tx,
                ratelimit::shared(Duration::from_secs(60)),
                config(Some(path.clone())),
            );
            monitor.run_cycle().await.unwrap();
        }

        let source = ScriptedSource::idle();
        let (tx, _rx) = mpsc::channel(8);
        let monitor = ProjectMonitor::new(
            source.clone(),
            Arc::new(JsonSeenStore::in_memory()),
            Arc::new(JsonProfileStore::in_memory(ProfileBook::default())),
            tx,
            ratelimit::shared(Duration::from_secs(60)),
            config(Some(path)),
        );
        monitor.run_cycle().await.unwrap();

        assert_eq!(source.cursors(), vec![Cursor::at(t0)]);
    }

    /// Sender whose every message fails with a revoked bot token.
    struct RevokedTokenSender;

    #[async_trait]
    impl MessageSender for RevokedTokenSender {
        async fn send_project(
            &self,
            _user_id: UserId,
            _project: &Project,
        ) -> Result<DeliveryOutcome, BotApiError> {
            Err(BotApiError::InvalidToken {
                status: 401,
                description: "Unauthorized".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn test_halted_delivery_stops_monitor() {
        let t0 = Utc::now();
        let source = ScriptedSource::new([
            fetched(&Cursor::start(), vec![design_project("p1", t0)]),
            fetched(
                &Cursor::at(t0),
                vec![design_project("p2", t0 + TimeDelta::seconds(5))],
            ),
        ]);
        let seen = Arc::new(JsonSeenStore::in_memory());
        let profiles = Arc::new(JsonProfileStore::in_memory(ProfileBook {
            profiles: vec![design_profile(1)],
        }));

        let (tx, rx) = mpsc::channel(8);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(RevokedTokenSender),
            profiles.clone(),
            DispatcherConfig::default(),
        ));
        let dispatcher_handle = tokio::spawn(Arc::clone(&dispatcher).run(rx));

        let monitor = ProjectMonitor::new(
            source.clone(),
            seen.clone(),
            profiles,
            tx,
            ratelimit::shared(Duration::from_secs(60)),
            config(None),
        );

        monitor.run_cycle().await.unwrap();

        // The dispatcher ends by itself once the token is rejected.
        tokio::time::timeout(Duration::from_secs(5), dispatcher_handle)
            .await
            .unwrap()
            .unwrap();
        assert!(dispatcher.is_halted());

        let result = monitor.run_cycle().await;
        assert!(matches!(result, Err(MonitorError::DispatcherGone)));

        let health = monitor.health().snapshot().await;
        assert_eq!(health.phase, MonitorPhase::Stopped);
        assert!(health.last_error.is_some());

        // The next batch was never fetched, so nothing was lost to the halt.
        assert_eq!(source.cursors().len(), 1);
        assert!(!seen.is_seen(&"p2".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_transient_failure_ignores_quota_reset() {
        let source = ScriptedSource::new([FetchOutcome::Transient {
            reason: "HTTP 502".to_owned(),
        }]);
        let h = harness(source, vec![]);
        h.rate_limit.write().await.record(
            RateLimitHeaders {
                limit: Some(300),
                remaining: Some(100),
                reset_after: Some(Duration::from_secs(1800)),
            },
            Utc::now(),
        );

        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.rate_limit.read().await.interval(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_low_quota_after_lapsed_throttle_still_widens() {
        let h = harness(ScriptedSource::idle(), vec![]);
        {
            let mut rate_limit = h.rate_limit.write().await;
            let earlier = Utc::now() - TimeDelta::seconds(120);
            rate_limit.record_throttled(Some(Duration::from_secs(60)), earlier);
            rate_limit.record(
                RateLimitHeaders {
                    limit: Some(300),
                    remaining: Some(2),
                    reset_after: None,
                },
                Utc::now(),
            );
        }

        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.rate_limit.read().await.interval(), Duration::from_secs(120));
    }
}
