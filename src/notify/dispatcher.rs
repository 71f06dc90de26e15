//! Notification dispatcher.
//!
//! Records are delivered by a bounded pool of tasks. Each delivery retries
//! retryable failures per [`RetryPolicy`]; a rejected user is deactivated and
//! skipped for the rest of the run. A fatal bot API error halts the pool and
//! closes the queue; records already queued are logged and dropped.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{BotApiError, DeliveryOutcome, MessageSender};
use crate::backoff::RetryPolicy;
use crate::config::MonitorSettings;
use crate::model::{Project, UserId};
use crate::scheduler::NotificationRecord;
use crate::store::ProfileStore;

/// Tuning of the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub retry: RetryPolicy,
    /// Deliveries in flight at once.
    pub concurrency: usize,
    /// How long in-flight deliveries may run after the queue closed.
    pub drain_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency: 4,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl DispatcherConfig {
    /// Builds the dispatcher tuning from settings.
    #[must_use]
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        Self {
            retry: RetryPolicy::with_max_attempts(settings.dispatch_max_attempts),
            concurrency: settings.dispatch_concurrency.max(1),
            drain_timeout: settings.dispatch_drain_timeout(),
        }
    }
}

/// Delivers queued notifications.
pub struct Dispatcher {
    sender: Arc<dyn MessageSender>,
    profiles: Arc<dyn ProfileStore>,
    config: DispatcherConfig,
    halted: AtomicBool,
    deactivated: RwLock<HashSet<UserId>>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        sender: Arc<dyn MessageSender>,
        profiles: Arc<dyn ProfileStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            sender,
            profiles,
            config,
            halted: AtomicBool::new(false),
            deactivated: RwLock::new(HashSet::new()),
        }
    }

    /// Whether a fatal bot API error stopped delivery.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Delivers `project` to `user_id`, retrying retryable failures.
    ///
    /// Returns the final outcome: `Retryable` means attempts ran out, and
    /// `Rejected` means the user's profile has been deactivated.
    ///
    /// # Errors
    ///
    /// Returns the bot API error that made the message undeliverable.
    pub async fn deliver(
        &self,
        user_id: UserId,
        project: &Project,
    ) -> Result<DeliveryOutcome, BotApiError> {
        if self.deactivated.read().await.contains(&user_id) {
            debug!("Skipping project {} for deactivated user {}", project.id, user_id);
            return Ok(DeliveryOutcome::Rejected("user deactivated earlier".to_owned()));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;

            match self.sender.send_project(user_id, project).await? {
                DeliveryOutcome::Delivered => {
                    info!("Sent project {} to user {}", project.id, user_id);
                    return Ok(DeliveryOutcome::Delivered);
                }
                DeliveryOutcome::Rejected(reason) => {
                    info!("User {} is unreachable ({}), deactivating", user_id, reason);
                    self.deactivate(user_id).await;
                    return Ok(DeliveryOutcome::Rejected(reason));
                }
                DeliveryOutcome::Retryable {
                    retry_after,
                    reason,
                } => match self.config.retry.next_delay(attempts, retry_after) {
                    Some(delay) => {
                        warn!(
                            "Delivery of project {} to user {} failed ({}), retry {} in {:?}",
                            project.id, user_id, reason, attempts, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(
                            "Giving up on project {} for user {} after {} attempts: {}",
                            project.id, user_id, attempts, reason
                        );
                        return Ok(DeliveryOutcome::Retryable {
                            retry_after,
                            reason,
                        });
                    }
                },
            }
        }
    }

    /// Consumes records until the queue closes or delivery halts, then drains
    /// in-flight deliveries for at most the configured timeout.
    ///
    /// A halt closes the queue, so the monitor sees its sender fail and stops
    /// instead of marking more projects seen.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<NotificationRecord>) {
        info!(
            "Notification dispatcher started ({} concurrent deliveries)",
            self.config.concurrency
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        loop {
            if self.is_halted() {
                break;
            }

            tokio::select! {
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join_error(joined);
                }
                record = rx.recv() => {
                    let Some(record) = record else {
                        break;
                    };
                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                        break;
                    };
                    let this = Arc::clone(&self);
                    tasks.spawn(async move {
                        this.handle(record).await;
                        drop(permit);
                    });
                }
            }
        }

        if self.is_halted() {
            rx.close();
            let mut dropped = 0;
            while let Ok(record) = rx.try_recv() {
                error!(
                    "Dropping project {} for user {}: delivery halted",
                    record.project.id, record.user_id
                );
                dropped += 1;
            }
            error!(
                "Notification delivery halted, queue closed ({} queued records dropped)",
                dropped
            );
        }

        if tasks.is_empty() {
            info!("Notification dispatcher stopped");
            return;
        }

        info!("Notification queue closed, draining {} deliveries", tasks.len());
        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                log_join_error(joined);
            }
        };
        if tokio::time::timeout(self.config.drain_timeout, drain).await.is_err() {
            warn!("Abandoning {} deliveries after drain timeout", tasks.len());
            tasks.abort_all();
        }
        info!("Notification dispatcher stopped");
    }

    async fn handle(&self, record: NotificationRecord) {
        if self.is_halted() {
            error!(
                "Dropping project {} for user {}: delivery halted",
                record.project.id, record.user_id
            );
            return;
        }

        match self.deliver(record.user_id, &record.project).await {
            Ok(outcome) => {
                if let Some(kind) = outcome.error_kind() {
                    debug!(
                        "Project {} for user {} not delivered ({})",
                        record.project.id, record.user_id, kind
                    );
                }
            }
            Err(e) if e.is_fatal() => {
                if !self.halted.swap(true, Ordering::AcqRel) {
                    error!("Halting notification delivery: {}", e);
                }
            }
            Err(e) => warn!(
                "Dropping project {} for user {}: {}",
                record.project.id, record.user_id, e
            ),
        }
    }

    async fn deactivate(&self, user_id: UserId) {
        self.deactivated.write().await.insert(user_id);
        if let Err(e) = self.profiles.deactivate(user_id).await {
            error!("Failed to deactivate profile of user {}: {}", user_id, e);
        }
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        error!("Delivery task panicked: {}", e);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}
