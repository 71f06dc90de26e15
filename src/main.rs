//! Project Monitor - Main Entry Point
//!
//! Polls (or receives via webhook) new Freelancehunt projects and sends
//! matching ones to Telegram users.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use project_monitor::config::{
    ApiCredentials, IngestMode, IngestSettings, MonitorSettings, ProfileBook,
};
use project_monitor::ingest::{ProjectSource, WebhookSource, WebhookState, router};
use project_monitor::marketplace::{MarketplaceClient, MarketplaceConfig};
use project_monitor::model::Project;
use project_monitor::notify::{BotApiClient, Dispatcher, DispatcherConfig};
use project_monitor::ratelimit;
use project_monitor::scheduler::{
    HealthHandle, MonitorConfig, MonitorMessage, NotificationRecord, ProjectMonitor,
};
use project_monitor::store::{JsonProfileStore, JsonSeenStore};

/// Notifies Telegram users about new Freelancehunt projects.
#[derive(Parser, Debug)]
#[command(name = "project_monitor")]
#[command(about = "Send new Freelancehunt projects matching user filters to Telegram")]
#[command(version)]
struct Args {
    /// Path to the filter profiles JSON file (overrides PROFILES_PATH).
    #[arg(short, long)]
    profiles: Option<String>,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Generate an example profiles file and exit.
    #[arg(long)]
    generate_profiles: bool,
}

/// Capacity of the monitor → dispatcher queue.
const NOTIFICATION_QUEUE: usize = 256;

/// Capacity of the webhook → monitor queue.
const WEBHOOK_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    if args.generate_profiles {
        return generate_example_profiles();
    }

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Load configurations
    let credentials =
        ApiCredentials::from_env().context("Failed to load API credentials from environment")?;

    let mut settings = MonitorSettings::from_env_with_defaults();
    if let Some(path) = args.profiles {
        settings.profiles_path = path.into();
    }
    settings
        .validate()
        .context("Monitor settings validation failed")?;

    let ingest = IngestSettings::from_env_with_defaults()
        .context("Failed to load ingestion settings")?;

    info!(
        "Check interval {}s (min {}s, max {}s), rate limit thresholds {}/{}",
        settings.default_check_interval_secs,
        settings.min_check_interval_secs,
        settings.max_check_interval_secs,
        settings.rate_limit_warning_threshold,
        settings.rate_limit_critical_threshold
    );

    // Stores
    let profiles = Arc::new(
        JsonProfileStore::open(&settings.profiles_path)
            .context("Failed to load filter profiles")?,
    );
    let seen = Arc::new(
        JsonSeenStore::open(&settings.seen_store_path)
            .await
            .context("Failed to load seen projects")?,
    );

    // Project source
    let marketplace_limit = ratelimit::shared(settings.default_check_interval());
    let (source, webhook_tx) = match ingest.mode {
        IngestMode::Polling => {
            let mut config = MarketplaceConfig::new(credentials.freelancehunt_token.clone());
            config.base_url.clone_from(&credentials.marketplace_url);
            config.min_request_interval = settings.min_api_request_interval();
            config.warning_threshold = settings.rate_limit_warning_threshold;
            config.critical_threshold = settings.rate_limit_critical_threshold;
            config.max_pages = settings.max_fetch_pages;

            let client: Arc<dyn ProjectSource> = Arc::new(
                MarketplaceClient::new(config, Arc::clone(&marketplace_limit))
                    .context("Failed to create marketplace client")?,
            );
            (client, None)
        }
        IngestMode::Webhook => {
            let (source, tx) = WebhookSource::channel(WEBHOOK_QUEUE);
            let source: Arc<dyn ProjectSource> = Arc::new(source);
            (source, Some(tx))
        }
    };

    // Dispatcher
    let bot = BotApiClient::new(
        &credentials.bot_api_url,
        &credentials.telegram_bot_token,
        settings.bot_min_send_interval(),
        ratelimit::shared(settings.default_check_interval()),
    )
    .context("Failed to create bot API client")?;

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(bot),
        profiles.clone(),
        DispatcherConfig::from_settings(&settings),
    ));
    let (notify_tx, notify_rx) = mpsc::channel::<NotificationRecord>(NOTIFICATION_QUEUE);
    let dispatcher_handle = tokio::spawn(Arc::clone(&dispatcher).run(notify_rx));

    // Monitor
    let monitor = Arc::new(ProjectMonitor::new(
        source,
        seen,
        profiles,
        notify_tx,
        marketplace_limit,
        MonitorConfig::from_settings(&settings),
    ));
    let health = monitor.health();

    // HTTP listener for webhooks and health checks
    if ingest.needs_listener() {
        spawn_listener(&ingest, webhook_tx, health.clone()).await?;
    }

    let (monitor_tx, monitor_rx) = mpsc::channel::<MonitorMessage>(8);
    let mut monitor_handle = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move { monitor.run(monitor_rx).await }
    });

    info!("Project monitor is running. Use Ctrl+C to stop.");

    // Wait for Ctrl+C or for the monitor to stop on its own
    let stopped_early = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            false
        }
        result = &mut monitor_handle => {
            match result {
                Ok(Ok(())) => info!("Monitor stopped"),
                Ok(Err(e)) => error!("Monitor stopped: {}", e),
                Err(e) => error!("Monitor task failed: {}", e),
            }
            true
        }
    };

    // Cleanup
    info!("Shutting down...");
    if !stopped_early {
        let _ = monitor_tx.send(MonitorMessage::Shutdown).await;
        let _ = monitor_handle.await;
    }

    // The monitor owns the last notification sender; dropping it lets the
    // dispatcher drain.
    drop(monitor);
    if let Err(e) = dispatcher_handle.await {
        warn!("Dispatcher task failed: {}", e);
    }

    let snapshot = health.snapshot().await;
    info!(
        "Stopped after {} cycles (last success: {:?})",
        snapshot.cycles, snapshot.last_success
    );

    if stopped_early && snapshot.last_error.is_some() {
        anyhow::bail!(
            "monitoring stopped: {}",
            snapshot.last_error.unwrap_or_default()
        );
    }

    Ok(())
}

/// Binds the HTTP listener and serves it in the background.
async fn spawn_listener(
    ingest: &IngestSettings,
    webhook_tx: Option<mpsc::Sender<Project>>,
    health: HealthHandle,
) -> Result<()> {
    let state = match webhook_tx {
        Some(tx) => {
            let secret = ingest
                .webhook_secret
                .clone()
                .context("WEBHOOK_SECRET is required in webhook mode")?;
            WebhookState::with_webhook(tx, secret, health)
        }
        None => WebhookState::health_only(health),
    };
    let app = router(state, &ingest.webhook_path);

    let addr = ingest.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {addr}"))?;
    info!("HTTP listener on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP listener failed: {}", e);
        }
    });

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Generates an example profiles file.
fn generate_example_profiles() -> Result<()> {
    let example = ProfileBook::example();
    example.save_to_file("profiles.example.json")?;

    println!("✓ Example profiles written to: profiles.example.json");
    println!("\nTo use the monitor:");
    println!("1. Copy profiles.example.json to profiles.json");
    println!("2. Replace the user ids with Telegram chat ids and adjust the filters");
    println!("3. Create a .env file with TELEGRAM_BOT_TOKEN and FREELANCEHUNT_TOKEN");
    println!("4. Run: project_monitor");

    Ok(())
}
