//! Push ingestion: the marketplace posts new listings to us.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use super::{Cursor, FetchBatch, FetchOutcome, ProjectSource};
use crate::marketplace::wire::ProjectResource;
use crate::model::Project;
use crate::scheduler::{HealthHandle, HealthSnapshot, MonitorPhase};

/// Accepted webhook bodies: a single resource or a list envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WebhookPayload {
    List { data: Vec<ProjectResource> },
    Single(Box<ProjectResource>),
}

impl WebhookPayload {
    fn into_projects(self) -> Vec<Project> {
        match self {
            Self::List { data } => data.into_iter().map(Project::from).collect(),
            Self::Single(resource) => vec![Project::from(*resource)],
        }
    }
}

/// Project source drained from listings the webhook endpoint queued.
#[derive(Debug)]
pub struct WebhookSource {
    queue: Mutex<mpsc::Receiver<Project>>,
}

impl WebhookSource {
    /// Creates the source and the sender the HTTP handler pushes into.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Sender<Project>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                queue: Mutex::new(rx),
            },
            tx,
        )
    }
}

#[async_trait]
impl ProjectSource for WebhookSource {
    async fn fetch_new_projects(&self, cursor: &Cursor) -> FetchOutcome {
        let mut queue = self.queue.lock().await;
        let mut projects = Vec::new();

        loop {
            match queue.try_recv() {
                Ok(project) => projects.push(project),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if projects.is_empty() {
                        return FetchOutcome::Fatal {
                            reason: "webhook receiver is no longer running".to_owned(),
                        };
                    }
                    break;
                }
            }
        }

        projects.sort_by(|a, b| a.posted_at.cmp(&b.posted_at));
        debug!("Drained {} queued webhook projects", projects.len());

        FetchOutcome::Fetched(FetchBatch {
            projects,
            next_cursor: cursor.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Header carrying the shared webhook secret.
pub const SECRET_HEADER: &str = "x-webhook-secret";

/// Queue and secret of the push endpoint.
#[derive(Clone)]
struct WebhookEndpoint {
    projects: mpsc::Sender<Project>,
    secret: Arc<str>,
}

impl WebhookEndpoint {
    fn authorizes(&self, headers: &HeaderMap) -> bool {
        headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|given| secrets_match(given.as_bytes(), self.secret.as_bytes()))
    }
}

/// Compares without stopping at the first differing byte.
fn secrets_match(given: &[u8], expected: &[u8]) -> bool {
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// Shared state of the HTTP listener.
#[derive(Clone)]
pub struct WebhookState {
    webhook: Option<WebhookEndpoint>,
    health: HealthHandle,
}

impl WebhookState {
    /// Listener that only answers health checks.
    #[must_use]
    pub const fn health_only(health: HealthHandle) -> Self {
        Self {
            webhook: None,
            health,
        }
    }

    /// Listener that also accepts pushed projects carrying `secret` in the
    /// [`SECRET_HEADER`] header.
    #[must_use]
    pub fn with_webhook(
        projects: mpsc::Sender<Project>,
        secret: impl Into<String>,
        health: HealthHandle,
    ) -> Self {
        Self {
            webhook: Some(WebhookEndpoint {
                projects,
                secret: Arc::from(secret.into()),
            }),
            health,
        }
    }
}

impl std::fmt::Debug for WebhookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookState")
            .field("webhook", &self.webhook.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds the router: `GET /health` always, `POST {webhook_path}` when the
/// state carries a project queue.
pub fn router(state: WebhookState, webhook_path: &str) -> Router {
    let mut router = Router::new().route("/health", get(health));
    if state.webhook.is_some() {
        info!("Accepting project webhooks on {}", webhook_path);
        router = router.route(webhook_path, post(receive));
    }
    router.with_state(state)
}

async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> Response {
    let Some(ref webhook) = state.webhook else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // Checked before the body so unauthenticated callers learn nothing.
    if !webhook.authorizes(&headers) {
        warn!("Rejecting webhook call without a valid secret");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection.into_response(),
    };

    for project in payload.into_projects() {
        let id = project.id.clone();
        if let Err(e) = webhook.projects.try_send(project) {
            warn!("Dropping webhook project {}: {}", id, e);
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
        debug!("Queued webhook project {}", id);
    }

    StatusCode::ACCEPTED.into_response()
}

async fn health(State(state): State<WebhookState>) -> (StatusCode, Json<HealthSnapshot>) {
    let snapshot = state.health.snapshot().await;
    let status = if snapshot.phase == MonitorPhase::Stopped {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(snapshot))
}
