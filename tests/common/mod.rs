#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;

use manga_mirror::auth::ApiKeyGuard;
use manga_mirror::clients::{
    CatalogApi, CatalogChapterPage, ChapterImage, ChapterItem, ChapterUploader, ClientError,
    ClientResult, Invalidator, NewCatalogChapter, NotificationGate, SourceMetadata, SourceScraper,
    StageRequest, StagedChapter, UploadRequest, UploadedChapter,
};
use manga_mirror::config::Config;
use manga_mirror::db::Registry;
use manga_mirror::events::{Event, EventPublisher};
use manga_mirror::handlers;
use manga_mirror::models::{CreateSeries, SeriesWithSources};
use manga_mirror::state::AppState;
use manga_mirror::sync::{Processor, Scanner};

pub const ADMIN_KEY: &str = "test-admin-key";

pub async fn test_registry() -> Registry {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    Registry::new(pool)
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: "sqlite::memory:".into(),
        scraper_base_urls: Vec::new(),
        uploader_base_url: String::new(),
        catalog_base_url: String::new(),
        cache_purge_base_url: None,
        realtime_base_url: None,
        notify_webhook_url: None,
        admin_api_key: ADMIN_KEY.into(),
        uploader_api_key: String::new(),
        catalog_api_key: String::new(),
        cache_purge_api_key: String::new(),
        realtime_api_key: String::new(),
        scanner_interval: Duration::from_secs(60),
        processor_interval: Duration::from_secs(10),
        max_concurrent_scans: 5,
        max_concurrent_syncs: 5,
        default_chapters_per_series: 3,
        fetch_timeout: Duration::from_secs(30),
        scrape_timeout: Duration::from_secs(60),
        upload_timeout: Duration::from_secs(120),
        max_task_retries: 3,
        notify_after_failures: 3,
        notification_cooldown: Duration::from_secs(3600),
        default_thumbnail_url: "https://cdn.example/default-thumb.jpg".into(),
        domain_rate_limits: HashMap::new(),
    }
}

pub fn create_spec(external_id: &str, urls: &[&str]) -> CreateSeries {
    CreateSeries {
        external_id: external_id.to_string(),
        title: format!("Series {}", external_id),
        source_urls: urls.iter().map(|u| u.to_string()).collect(),
        check_interval_minutes: None,
        priority: None,
        auto_sync_enabled: None,
    }
}

pub async fn seed_series(
    registry: &Registry,
    external_id: &str,
    urls: &[&str],
) -> SeriesWithSources {
    registry
        .create_series(&create_spec(external_id, urls))
        .await
        .unwrap()
}

pub fn chapter(number: &str, series_slug: &str) -> ChapterItem {
    ChapterItem {
        title: format!("Chapter {}", number),
        url: format!("https://src.example/{}/chapter-{}", series_slug, number),
        date: None,
        weight: None,
    }
}

/// Listings newest-first, the way sources publish them.
pub fn listing(series_slug: &str, numbers: &[&str]) -> Vec<ChapterItem> {
    numbers.iter().map(|n| chapter(n, series_slug)).collect()
}

#[derive(Default)]
pub struct ScriptedScraper {
    pub listings: HashMap<String, Vec<ChapterItem>>,
    pub failing_sources: HashSet<String>,
    pub metadata: HashMap<String, SourceMetadata>,
    pub images: HashMap<String, Vec<ChapterImage>>,
    pub failing_chapters: HashSet<String>,
    pub fail_stage: bool,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedScraper {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceScraper for ScriptedScraper {
    async fn list_chapters(&self, source_url: &str) -> ClientResult<Vec<ChapterItem>> {
        self.calls.lock().unwrap().push(format!("list:{}", source_url));
        if self.failing_sources.contains(source_url) {
            return Err(ClientError::Timeout(source_url.to_string()));
        }
        self.listings
            .get(source_url)
            .cloned()
            .ok_or_else(|| ClientError::Unavailable(format!("no listing for {}", source_url)))
    }

    async fn source_metadata(&self, source_url: &str) -> ClientResult<Option<SourceMetadata>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("metadata:{}", source_url));
        Ok(self.metadata.get(source_url).copied())
    }

    async fn chapter_images(&self, chapter_url: &str) -> ClientResult<Vec<ChapterImage>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("images:{}", chapter_url));
        if self.failing_chapters.contains(chapter_url) {
            return Err(ClientError::Timeout(chapter_url.to_string()));
        }
        match self.images.get(chapter_url) {
            Some(images) => Ok(images.clone()),
            None => Ok(vec![ChapterImage {
                index: 0,
                download_url: format!("{}/001.jpg", chapter_url),
            }]),
        }
    }

    async fn stage_chapter(&self, request: &StageRequest) -> ClientResult<StagedChapter> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("stage:{}", request.chapter_number));
        if self.fail_stage {
            return Err(ClientError::Unavailable("stager down".into()));
        }
        Ok(StagedChapter {
            zip_url: format!(
                "https://staging.example/{}/{}.zip",
                request.series_external_id, request.chapter_number
            ),
            file_name: format!("{}.zip", request.chapter_number),
            total_images: request.images.len() as i64,
        })
    }
}

#[derive(Default)]
pub struct ScriptedUploader {
    pub fail_next: Mutex<u32>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedUploader {
    pub fn fail_times(&self, times: u32) {
        *self.fail_next.lock().unwrap() = times;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChapterUploader for ScriptedUploader {
    async fn upload_single(&self, request: &UploadRequest) -> ClientResult<UploadedChapter> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("upload:{}", request.chapter_number));
        {
            let mut remaining = self.fail_next.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::Timeout("uploader".into()));
            }
        }
        Ok(UploadedChapter {
            chapter_id: format!("ch-{}", request.chapter_number),
            images: vec!["001.jpg".into(), "002.jpg".into()],
            path: format!(
                "/storage/{}/{}",
                request.series_external_id, request.chapter_number
            ),
        })
    }
}

#[derive(Default)]
pub struct ScriptedCatalog {
    pub existing: Mutex<Vec<f64>>,
    pub created: Mutex<Vec<(String, NewCatalogChapter)>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedCatalog {
    pub fn with_chapters(numbers: &[f64]) -> Self {
        Self {
            existing: Mutex::new(numbers.to_vec()),
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<(String, NewCatalogChapter)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogApi for ScriptedCatalog {
    async fn list_chapters(
        &self,
        external_id: &str,
        page: i64,
        page_size: i64,
    ) -> ClientResult<CatalogChapterPage> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("list:{}:{}", external_id, page));
        let existing = self.existing.lock().unwrap();
        let start = ((page - 1) * page_size) as usize;
        let end = (start + page_size as usize).min(existing.len());
        let slice = if start < existing.len() {
            existing[start..end].to_vec()
        } else {
            Vec::new()
        };
        let total_pages = ((existing.len() as i64) + page_size - 1) / page_size;
        Ok(CatalogChapterPage {
            chapter_numbers: slice,
            total_pages: total_pages.max(1),
            total_records: existing.len() as i64,
        })
    }

    async fn create_chapters(
        &self,
        external_id: &str,
        chapters: &[NewCatalogChapter],
    ) -> ClientResult<()> {
        let mut existing = self.existing.lock().unwrap();
        let mut created = self.created.lock().unwrap();
        for chapter in chapters {
            existing.push(chapter.chapter_number);
            created.push((external_id.to_string(), chapter.clone()));
        }
        Ok(())
    }
}

pub fn quiet_notifications() -> Arc<NotificationGate> {
    Arc::new(NotificationGate::new(None, 3, Duration::from_secs(3600)))
}

pub fn make_scanner(
    registry: Registry,
    scraper: Arc<ScriptedScraper>,
    catalog: Arc<ScriptedCatalog>,
) -> (Scanner, mpsc::Receiver<Event>) {
    let (events, rx) = EventPublisher::new(64);
    let scanner = Scanner::new(
        registry,
        scraper,
        catalog,
        events,
        quiet_notifications(),
        5,
    );
    (scanner, rx)
}

pub struct ProcessorRig {
    pub processor: Processor,
    pub events: mpsc::Receiver<Event>,
    pub purges: mpsc::Receiver<String>,
}

pub fn make_processor(
    registry: Registry,
    scraper: Arc<ScriptedScraper>,
    uploader: Arc<ScriptedUploader>,
    catalog: Arc<ScriptedCatalog>,
    config: Config,
) -> ProcessorRig {
    let (events, events_rx) = EventPublisher::new(64);
    let (invalidator, purges) = Invalidator::new();
    let processor = Processor::new(
        registry,
        scraper,
        uploader,
        catalog,
        events,
        invalidator,
        quiet_notifications(),
        Arc::new(config),
    );
    ProcessorRig {
        processor,
        events: events_rx,
        purges,
    }
}

pub fn drain_events(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn test_app(registry: Registry) -> axum::Router {
    let config = Arc::new(test_config());
    let (events, _events_rx) = EventPublisher::new(64);
    let state = AppState {
        registry,
        config: config.clone(),
        events,
        realtime: None,
        started_at: Instant::now(),
    };
    let guard = Arc::new(ApiKeyGuard::new(&config.admin_api_key));
    handlers::router(state, guard)
}
