//! Rate-limited Freelancehunt API client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::wire::ProjectList;
use crate::error::ErrorKind;
use crate::ingest::{Cursor, FetchBatch, FetchOutcome, ProjectSource};
use crate::model::Project;
use crate::ratelimit::{RateLimitHeaders, RateLimiter, SharedRateLimit};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.freelancehunt.com/v2";

/// Extra pause before a request when the quota is below the warning threshold.
const WARNING_PAUSE: Duration = Duration::from_secs(5);

/// Extra pause before a request when the quota is below the critical threshold.
const CRITICAL_PAUSE: Duration = Duration::from_secs(10);

/// Errors that can occur while talking to the marketplace.
#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Quota exhausted, next window in {0:?}")]
    QuotaExhausted(Option<Duration>),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Request rejected with {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected response body: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl MarketplaceError {
    /// Classifies the error for the scheduler.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } | Self::QuotaExhausted(_) => ErrorKind::Throttled,
            Self::Server { .. } | Self::Transport(_) => ErrorKind::Transient,
            // A 2xx body we cannot read means the API contract changed.
            Self::Rejected { .. } | Self::Decode(_) => ErrorKind::Fatal,
        }
    }
}

impl From<MarketplaceError> for FetchOutcome {
    fn from(err: MarketplaceError) -> Self {
        match err {
            MarketplaceError::RateLimited { retry_after }
            | MarketplaceError::QuotaExhausted(retry_after) => Self::Throttled { retry_after },
            err if err.kind() == ErrorKind::Fatal => Self::Fatal {
                reason: err.to_string(),
            },
            err => Self::Transient {
                reason: err.to_string(),
            },
        }
    }
}

/// Connection settings for [`MarketplaceClient`].
#[derive(Clone)]
pub struct MarketplaceConfig {
    pub base_url: String,
    pub token: String,
    /// Minimum spacing between any two requests.
    pub min_request_interval: Duration,
    pub warning_threshold: u32,
    pub critical_threshold: u32,
    /// Pages followed per fetch while every item is still new.
    pub max_pages: u32,
    pub request_timeout: Duration,
}

impl MarketplaceConfig {
    /// Creates a configuration with the given token and default limits.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            token: token.into(),
            min_request_interval: Duration::from_secs(1),
            warning_threshold: 20,
            critical_threshold: 10,
            max_pages: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for MarketplaceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceConfig")
            .field("base_url", &self.base_url)
            .field("min_request_interval", &self.min_request_interval)
            .field("max_pages", &self.max_pages)
            .finish_non_exhaustive()
    }
}

/// Polling client for the marketplace project feed.
pub struct MarketplaceClient {
    http: reqwest::Client,
    config: MarketplaceConfig,
    limiter: RateLimiter,
    rate_limit: SharedRateLimit,
}

impl MarketplaceClient {
    /// Creates a client writing quota information into `rate_limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: MarketplaceConfig, rate_limit: SharedRateLimit) -> Result<Self, MarketplaceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("project_monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            limiter: RateLimiter::new(config.min_request_interval),
            http,
            config,
            rate_limit,
        })
    }

    /// Fetches listings newer than `cursor`, following pagination while
    /// every listing on a page is still new.
    ///
    /// # Errors
    ///
    /// Returns an error for any failed page; partial batches are discarded.
    pub async fn fetch_since(&self, cursor: &Cursor) -> Result<FetchBatch, MarketplaceError> {
        let mut url = format!("{}/projects", self.config.base_url.trim_end_matches('/'));
        let mut projects: Vec<Project> = Vec::new();

        for page in 1..=self.config.max_pages.max(1) {
            let list = self.get_page(&url).await?;
            let fetched = list.data.len();

            let mut reached_cursor = false;
            for project in list.data.into_iter().map(Project::from) {
                match cursor.since {
                    Some(since) if project.posted_at < since => reached_cursor = true,
                    _ => projects.push(project),
                }
            }

            debug!(page, fetched, kept = projects.len(), "Fetched project page");

            // Without a cursor the first page is enough to establish a position.
            if reached_cursor || cursor.since.is_none() || fetched == 0 {
                break;
            }
            match list.links.next {
                Some(next) => url = next,
                None => break,
            }
        }

        projects.sort_by(|a, b| a.posted_at.cmp(&b.posted_at).then_with(|| a.id.cmp(&b.id)));
        projects.dedup_by(|a, b| a.id == b.id);

        let next_cursor = cursor.advanced_past(&projects);
        info!("Received {} new projects from API", projects.len());

        Ok(FetchBatch {
            projects,
            next_cursor,
        })
    }

    /// Issues one rate-limited GET and records the quota it reports.
    async fn get_page(&self, url: &str) -> Result<ProjectList, MarketplaceError> {
        self.wait_for_quota().await?;

        debug!("Making API request to: {}", url);
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.token)
            .send()
            .await?;

        let status = response.status();
        let headers = RateLimitHeaders::from_headers(response.headers(), Utc::now());
        self.rate_limit.write().await.record(headers, Utc::now());

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limit exceeded (HTTP 429)");
            self.rate_limit
                .write()
                .await
                .record_throttled(headers.reset_after, Utc::now());
            if let Some(delay) = headers.reset_after {
                self.limiter.defer(delay).await;
            }
            return Err(MarketplaceError::RateLimited {
                retry_after: headers.reset_after,
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message = truncate_for_log(&message, 200);
            return Err(if status.is_server_error() {
                MarketplaceError::Server {
                    status: status.as_u16(),
                    message,
                }
            } else {
                MarketplaceError::Rejected {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        let body = response.text().await?;
        let list: ProjectList =
            serde_json::from_str(&body).map_err(|e| MarketplaceError::Decode(e.to_string()))?;

        if headers.remaining.is_none()
            && let Some(body_limit) = list.meta.as_ref().and_then(|m| m.ratelimit.as_ref())
        {
            debug!("Rate limit info from body: {:?}", body_limit);
            self.rate_limit.write().await.record(
                RateLimitHeaders {
                    limit: body_limit.limit,
                    remaining: body_limit.remaining,
                    reset_after: None,
                },
                Utc::now(),
            );
        }

        Ok(list)
    }

    /// Refuses when the quota is spent, otherwise waits for the request slot
    /// plus an extra pause when the quota runs low.
    async fn wait_for_quota(&self) -> Result<(), MarketplaceError> {
        let (exhausted, until_reset, remaining) = {
            let state = self.rate_limit.read().await;
            let now = Utc::now();
            (
                state.is_exhausted(now),
                state.time_until_reset(now),
                state.effective_remaining(now),
            )
        };

        if exhausted {
            warn!("Rate limit exhausted, skipping request");
            return Err(MarketplaceError::QuotaExhausted(until_reset));
        }

        self.limiter.wait_and_acquire().await;

        if let Some(pause) = low_quota_pause(
            remaining,
            self.config.warning_threshold,
            self.config.critical_threshold,
        ) {
            warn!(
                "Low rate limit remaining ({:?}), waiting {:?}",
                remaining, pause
            );
            tokio::time::sleep(pause).await;
        }

        Ok(())
    }
}

#[async_trait]
impl ProjectSource for MarketplaceClient {
    async fn fetch_new_projects(&self, cursor: &Cursor) -> FetchOutcome {
        match self.fetch_since(cursor).await {
            Ok(batch) => FetchOutcome::Fetched(batch),
            Err(err) => {
                warn!(kind = %err.kind(), "Project fetch failed: {}", err);
                err.into()
            }
        }
    }

    fn name(&self) -> &'static str {
        "freelancehunt"
    }
}

impl std::fmt::Debug for MarketplaceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceClient")
            .field("base_url", &self.config.base_url)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

/// Extra wait before a request, based on the remaining quota.
fn low_quota_pause(remaining: Option<u32>, warning: u32, critical: u32) -> Option<Duration> {
    match remaining {
        Some(r) if r < critical => Some(CRITICAL_PAUSE),
        Some(r) if r < warning => Some(WARNING_PAUSE),
        _ => None,
    }
}

/// Truncates a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use chrono::{DateTime, TimeDelta};

    use super::*;
    use crate::marketplace::wire::tests::SAMPLE;
    use crate::ratelimit::{self, SharedRateLimit};

    struct Reply {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: String,
    }

    impl Reply {
        fn ok(body: impl Into<String>) -> Self {
            Self {
                status: 200,
                headers: Vec::new(),
                body: body.into(),
            }
        }

        fn status(status: u16) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: r#"{"error": "nope"}"#.to_owned(),
            }
        }
    }

    /// Local stand-in for the projects endpoint, answering from a script.
    #[derive(Clone, Default)]
    struct FakeApi {
        replies: Arc<Mutex<VecDeque<Reply>>>,
        requests: Arc<Mutex<Vec<String>>>,
        auth: Arc<Mutex<Vec<String>>>,
    }

    impl FakeApi {
        fn push(&self, reply: Reply) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn serve_projects(State(api): State<FakeApi>, uri: Uri, headers: HeaderMap) -> Response {
        api.requests.lock().unwrap().push(uri.to_string());
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            api.auth.lock().unwrap().push(auth.to_owned());
        }

        let reply = api
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::ok(r#"{"data": []}"#));

        let mut response =
            (StatusCode::from_u16(reply.status).unwrap(), reply.body).into_response();
        for (name, value) in reply.headers {
            response.headers_mut().insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        response
    }

    async fn spawn_api() -> (String, FakeApi) {
        let api = FakeApi::default();
        let app = Router::new()
            .route("/projects", get(serve_projects))
            .with_state(api.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), api)
    }

    fn client_for(base_url: &str, max_pages: u32) -> (MarketplaceClient, SharedRateLimit) {
        let rate_limit = ratelimit::shared(Duration::from_secs(60));
        let mut config = MarketplaceConfig::new("token");
        config.base_url = base_url.to_owned();
        config.min_request_interval = Duration::ZERO;
        config.max_pages = max_pages;
        let client = MarketplaceClient::new(config, Arc::clone(&rate_limit)).unwrap();
        (client, rate_limit)
    }

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_717_000_000, 0).unwrap()
    }

    fn at(offset_secs: i64) -> DateTime<Utc> {
        base_time() + TimeDelta::seconds(offset_secs)
    }

    fn resource(id: u64, offset_secs: i64) -> String {
        format!(
            r#"{{"id": {id}, "attributes": {{"name": "Project {id}", "status": {{"id": 11, "name": "Open"}}, "published_at": "{}"}}}}"#,
            at(offset_secs).to_rfc3339()
        )
    }

    /// A page with the given `(id, offset)` resources, newest first.
    fn page(items: &[(u64, i64)], next: Option<String>) -> String {
        let data: Vec<String> = items.iter().map(|&(id, offset)| resource(id, offset)).collect();
        let links = next.map_or_else(|| "{}".to_owned(), |url| format!(r#"{{"next": "{url}"}}"#));
        format!(r#"{{"data": [{}], "links": {links}}}"#, data.join(","))
    }

    fn ids(batch: &FetchBatch) -> Vec<&str> {
        batch.projects.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_first_fetch_reads_one_page_and_body_quota() {
        let (base_url, api) = spawn_api().await;
        api.push(Reply::ok(SAMPLE));
        let (client, rate_limit) = client_for(&base_url, 3);

        let FetchOutcome::Fetched(batch) = client.fetch_new_projects(&Cursor::start()).await else {
            panic!("expected a batch");
        };

        // No cursor yet: the next link is not followed.
        assert_eq!(api.requests(), vec!["/projects".to_owned()]);
        assert_eq!(api.auth.lock().unwrap().clone(), vec!["Bearer token".to_owned()]);
        assert_eq!(ids(&batch), vec!["1021", "1022"]);
        assert_eq!(batch.next_cursor, Cursor::at(batch.projects[1].posted_at));

        let state = rate_limit.read().await;
        assert_eq!(state.limit, Some(300));
        assert_eq!(state.remaining, Some(250));
    }

    #[tokio::test]
    async fn test_pagination_stops_at_cursor() {
        let (base_url, api) = spawn_api().await;
        api.push(Reply::ok(page(
            &[(4, 40), (3, 30)],
            Some(format!("{base_url}/projects?page=2")),
        )));
        api.push(Reply::ok(page(
            &[(2, 20), (1, 0), (0, -10)],
            Some(format!("{base_url}/projects?page=3")),
        )));
        let (client, _) = client_for(&base_url, 5);

        let batch = client.fetch_since(&Cursor::at(at(0))).await.unwrap();

        assert_eq!(
            api.requests(),
            vec!["/projects".to_owned(), "/projects?page=2".to_owned()]
        );
        // Inclusive at the cursor, oldest first, older items cut off.
        assert_eq!(ids(&batch), vec!["1", "2", "3", "4"]);
        assert_eq!(batch.next_cursor, Cursor::at(at(40)));
    }

    #[tokio::test]
    async fn test_pagination_respects_page_cap() {
        let (base_url, api) = spawn_api().await;
        for n in 0..4 {
            api.push(Reply::ok(page(
                &[(100 - n, 100 - i64::try_from(n).unwrap())],
                Some(format!("{base_url}/projects?page={}", n + 2)),
            )));
        }
        let (client, _) = client_for(&base_url, 2);

        let batch = client.fetch_since(&Cursor::at(at(0))).await.unwrap();

        assert_eq!(api.requests().len(), 2);
        assert_eq!(ids(&batch), vec!["99", "100"]);
    }

    #[tokio::test]
    async fn test_rate_limited_response_is_throttled() {
        let (base_url, api) = spawn_api().await;
        api.push(Reply {
            status: 429,
            headers: vec![("retry-after", "30"), ("x-ratelimit-remaining", "0")],
            body: String::new(),
        });
        let (client, rate_limit) = client_for(&base_url, 3);

        let outcome = client.fetch_new_projects(&Cursor::start()).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Throttled { retry_after: Some(d) } if d == Duration::from_secs(30)
        ));
        assert!(rate_limit.read().await.is_exhausted(Utc::now()));

        // Until the window lapses no request goes out.
        let again = client.fetch_new_projects(&Cursor::start()).await;
        assert!(matches!(again, FetchOutcome::Throttled { .. }));
        assert_eq!(api.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let (base_url, api) = spawn_api().await;
        api.push(Reply::status(502));
        let (client, _) = client_for(&base_url, 3);

        let outcome = client.fetch_new_projects(&Cursor::start()).await;
        assert!(matches!(outcome, FetchOutcome::Transient { .. }));
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let (base_url, api) = spawn_api().await;
        api.push(Reply::status(401));
        let (client, _) = client_for(&base_url, 3);

        let outcome = client.fetch_new_projects(&Cursor::start()).await;
        assert!(matches!(outcome, FetchOutcome::Fatal { .. }));
    }

    #[tokio::test]
    async fn test_failed_page_discards_partial_batch() {
        let (base_url, api) = spawn_api().await;
        api.push(Reply::ok(page(
            &[(2, 20), (1, 10)],
            Some(format!("{base_url}/projects?page=2")),
        )));
        api.push(Reply::status(503));
        let (client, _) = client_for(&base_url, 3);

        let outcome = client.fetch_new_projects(&Cursor::at(at(0))).await;
        assert!(matches!(outcome, FetchOutcome::Transient { .. }));
        assert_eq!(api.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_contract_violation_is_fatal() {
        let (base_url, api) = spawn_api().await;
        api.push(Reply::ok(
            r#"{"data": [{"id": 7, "attributes": {"name": "No date"}}]}"#,
        ));
        let (client, _) = client_for(&base_url, 3);

        let outcome = client.fetch_new_projects(&Cursor::start()).await;
        let FetchOutcome::Fatal { reason } = outcome else {
            panic!("expected a fatal outcome");
        };
        assert!(reason.contains("published_at"));
    }

    #[test]
    fn test_low_quota_pause() {
        assert_eq!(low_quota_pause(None, 20, 10), None);
        assert_eq!(low_quota_pause(Some(50), 20, 10), None);
        assert_eq!(low_quota_pause(Some(15), 20, 10), Some(WARNING_PAUSE));
        assert_eq!(low_quota_pause(Some(3), 20, 10), Some(CRITICAL_PAUSE));
    }

    #[test]
    fn test_error_classification() {
        let throttled: FetchOutcome = MarketplaceError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        }
        .into();
        assert!(matches!(
            throttled,
            FetchOutcome::Throttled { retry_after: Some(d) } if d == Duration::from_secs(5)
        ));

        let server: FetchOutcome = MarketplaceError::Server {
            status: 502,
            message: "bad gateway".to_owned(),
        }
        .into();
        assert!(matches!(server, FetchOutcome::Transient { .. }));

        let auth: FetchOutcome = MarketplaceError::Rejected {
            status: 401,
            message: "invalid token".to_owned(),
        }
        .into();
        assert!(matches!(auth, FetchOutcome::Fatal { .. }));

        let contract: FetchOutcome = MarketplaceError::Decode("missing field".to_owned()).into();
        assert!(matches!(contract, FetchOutcome::Fatal { .. }));
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("Hello", 10), "Hello");
        assert_eq!(truncate_for_log("Hello, World!", 5), "Hello...");
    }

    #[tokio::test]
    async fn test_exhausted_quota_skips_request() {
        let rate_limit = crate::ratelimit::shared(Duration::from_secs(60));
        rate_limit
            .write()
            .await
            .record_throttled(Some(Duration::from_secs(120)), Utc::now());

        let mut config = MarketplaceConfig::new("token");
        // Unroutable; the request must never be attempted.
        config.base_url = "http://127.0.0.1:9".to_owned();
        let client = MarketplaceClient::new(config, rate_limit).unwrap();

        let outcome = client.fetch_new_projects(&Cursor::start()).await;
        assert!(matches!(outcome, FetchOutcome::Throttled { retry_after: Some(_) }));
    }
}
