use std::sync::Arc;
use std::time::Instant;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use manga_mirror::auth::ApiKeyGuard;
use manga_mirror::clients::{
    create_client, purge::spawn_purge_worker, CachePurger, CatalogApi, ChapterUploader,
    FailureNotifier, HttpCachePurger, HttpCatalog, HttpRealtimeBus, HttpScraper, HttpUploader,
    Invalidator, NotificationGate, RealtimeBus, SourceScraper, WebhookNotifier,
};
use manga_mirror::config::Config;
use manga_mirror::db::{self, Registry};
use manga_mirror::events::{spawn_event_worker, EventPublisher};
use manga_mirror::handlers;
use manga_mirror::state::AppState;
use manga_mirror::sync::{start_scheduler, Processor, Scanner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);
    let pool = db::init_db(&config.database_url).await?;
    let registry = Registry::new(pool.clone());

    // Repair any state left behind by a previous run before work resumes.
    let recovery = registry.recover_stale_tasks().await?;
    tracing::info!(
        "Startup recovery: {} task(s) resumed, {} restarted, {} series recomputed",
        recovery.tasks_resumed,
        recovery.tasks_restarted,
        recovery.series_recomputed
    );

    let client = create_client();
    let scraper: Arc<dyn SourceScraper> = Arc::new(HttpScraper::new(
        client.clone(),
        config.scraper_base_urls.clone(),
        config.fetch_timeout,
        config.scrape_timeout,
        config.upload_timeout,
    ));
    let uploader: Arc<dyn ChapterUploader> = Arc::new(HttpUploader::new(
        client.clone(),
        config.uploader_base_url.clone(),
        config.uploader_api_key.clone(),
        config.upload_timeout,
    ));
    let catalog: Arc<dyn CatalogApi> = Arc::new(HttpCatalog::new(
        client.clone(),
        config.catalog_base_url.clone(),
        config.catalog_api_key.clone(),
        config.fetch_timeout,
    ));
    let realtime: Option<Arc<dyn RealtimeBus>> = config.realtime_base_url.as_ref().map(|base| {
        Arc::new(HttpRealtimeBus::new(
            client.clone(),
            base.clone(),
            config.realtime_api_key.clone(),
            config.fetch_timeout,
        )) as Arc<dyn RealtimeBus>
    });

    let (events, events_rx) = EventPublisher::new(256);
    if let Some(bus) = realtime.clone() {
        spawn_event_worker(events_rx, bus);
    }

    let (invalidator, purge_rx) = Invalidator::new();
    if let Some(base) = &config.cache_purge_base_url {
        let purger: Arc<dyn CachePurger> = Arc::new(HttpCachePurger::new(
            client.clone(),
            base.clone(),
            config.cache_purge_api_key.clone(),
            config.fetch_timeout,
        ));
        spawn_purge_worker(purge_rx, purger);
    }

    let notifier: Option<Arc<dyn FailureNotifier>> = config.notify_webhook_url.as_ref().map(|url| {
        Arc::new(WebhookNotifier::new(
            client.clone(),
            url.clone(),
            config.fetch_timeout,
        )) as Arc<dyn FailureNotifier>
    });
    let notifications = Arc::new(NotificationGate::new(
        notifier,
        config.notify_after_failures,
        config.notification_cooldown,
    ));

    let scanner = Arc::new(Scanner::new(
        registry.clone(),
        scraper.clone(),
        catalog.clone(),
        events.clone(),
        notifications.clone(),
        config.max_concurrent_scans,
    ));
    let processor = Arc::new(Processor::new(
        registry.clone(),
        scraper,
        uploader,
        catalog,
        events.clone(),
        invalidator,
        notifications,
        config.clone(),
    ));
    let scheduler = start_scheduler(
        scanner,
        processor,
        config.scanner_interval,
        config.processor_interval,
    );

    let state = AppState {
        registry,
        config: config.clone(),
        events,
        realtime,
        started_at: Instant::now(),
    };
    let guard = Arc::new(ApiKeyGuard::new(&config.admin_api_key));
    let app = handlers::router(state, guard);

    let addr: std::net::SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down scheduler...");
    scheduler.shutdown().await;

    tracing::info!("Closing database connections...");
    pool.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
