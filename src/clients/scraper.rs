use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::clients::{ClientError, ClientResult};

const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(3);
const TRANSIENT_RETRY_LIMIT: u32 = 20;
const LISTING_CACHE_TTL: Duration = Duration::from_secs(60);

/// One chapter as discovered on a source website.
#[derive(Debug, Clone, Deserialize)]
pub struct ChapterItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Lightweight per-source summary used to skip full listing fetches.
#[derive(Debug, Clone, Copy)]
pub struct SourceMetadata {
    pub last_chapter: Option<f64>,
    pub total: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChapterImage {
    pub index: i64,
    #[serde(alias = "downloadUrl")]
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRequest {
    #[serde(rename = "imageDataArray")]
    pub images: Vec<StageImage>,
    pub series_external_id: String,
    #[serde(rename = "chapterNumber")]
    pub chapter_number: String,
    #[serde(rename = "seriesTitle")]
    pub series_title: String,
    #[serde(rename = "chapterUrl")]
    pub chapter_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageImage {
    pub index: i64,
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
}

#[derive(Debug, Clone)]
pub struct StagedChapter {
    pub zip_url: String,
    pub file_name: String,
    pub total_images: i64,
}

/// Contract with the external scraper service: chapter discovery, image
/// enumeration, and staging of a packaged chapter archive.
#[async_trait]
pub trait SourceScraper: Send + Sync {
    async fn list_chapters(&self, source_url: &str) -> ClientResult<Vec<ChapterItem>>;
    async fn source_metadata(&self, source_url: &str) -> ClientResult<Option<SourceMetadata>>;
    async fn chapter_images(&self, chapter_url: &str) -> ClientResult<Vec<ChapterImage>>;
    async fn stage_chapter(&self, request: &StageRequest) -> ClientResult<StagedChapter>;
}

#[derive(Deserialize)]
struct ListChaptersResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Vec<ChapterItem>,
    #[serde(default, rename = "hasMore")]
    has_more: bool,
}

#[derive(Deserialize)]
struct MetadataResponse {
    #[serde(default, rename = "lastChapter")]
    last_chapter: Option<MetadataLastChapter>,
    #[serde(default)]
    total: Option<i64>,
}

#[derive(Deserialize)]
struct MetadataLastChapter {
    #[serde(default)]
    number: Option<f64>,
}

#[derive(Deserialize)]
struct ChapterImagesResponse {
    #[serde(default)]
    data: Vec<ChapterImage>,
}

#[derive(Deserialize)]
struct StageResponse {
    #[serde(default)]
    success: bool,
    data: Option<StageResponseData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct StageResponseData {
    #[serde(rename = "publicUrl")]
    public_url: String,
    #[serde(rename = "fileName")]
    file_name: String,
    #[serde(rename = "totalImages")]
    total_images: i64,
}

struct HostHealth {
    failures: u32,
    unhealthy_until: Option<Instant>,
}

/// HTTP scraper fronting a pool of interchangeable hosts. Selection is
/// round-robin; a host that fails `max_failures` times in a row is skipped
/// until its cool-down expires, and the pool resets if every host is out.
pub struct HttpScraper {
    client: Client,
    hosts: Vec<String>,
    next: AtomicUsize,
    health: Mutex<Vec<HostHealth>>,
    max_failures: u32,
    cooldown: Duration,
    fetch_timeout: Duration,
    scrape_timeout: Duration,
    upload_timeout: Duration,
    listings: Cache<String, Vec<ChapterItem>>,
}

impl HttpScraper {
    pub fn new(
        client: Client,
        hosts: Vec<String>,
        fetch_timeout: Duration,
        scrape_timeout: Duration,
        upload_timeout: Duration,
    ) -> Self {
        let health = hosts
            .iter()
            .map(|_| HostHealth {
                failures: 0,
                unhealthy_until: None,
            })
            .collect();
        Self {
            client,
            hosts,
            next: AtomicUsize::new(0),
            health: Mutex::new(health),
            max_failures: 3,
            cooldown: Duration::from_secs(60),
            fetch_timeout,
            scrape_timeout,
            upload_timeout,
            listings: Cache::builder().time_to_live(LISTING_CACHE_TTL).build(),
        }
    }

    fn pick_host(&self) -> ClientResult<usize> {
        if self.hosts.is_empty() {
            return Err(ClientError::Unavailable("no scraper hosts configured".into()));
        }
        let mut health = self.health.lock().unwrap();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        for offset in 0..self.hosts.len() {
            let index = (start + offset) % self.hosts.len();
            match health[index].unhealthy_until {
                Some(until) if until > now => continue,
                _ => return Ok(index),
            }
        }

        // Every host is cooling down; reset the pool rather than going dark.
        for entry in health.iter_mut() {
            entry.failures = 0;
            entry.unhealthy_until = None;
        }
        Ok(start % self.hosts.len())
    }

    fn mark_success(&self, index: usize) {
        let mut health = self.health.lock().unwrap();
        health[index].failures = 0;
        health[index].unhealthy_until = None;
    }

    fn mark_failure(&self, index: usize) {
        let mut health = self.health.lock().unwrap();
        health[index].failures += 1;
        if health[index].failures >= self.max_failures {
            health[index].unhealthy_until = Some(Instant::now() + self.cooldown);
            tracing::warn!(
                "Scraper host {} unhealthy after {} consecutive failures",
                self.hosts[index],
                health[index].failures
            );
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        host: usize,
        path_and_query: &str,
        deadline: Duration,
    ) -> ClientResult<T> {
        let url = format!("{}{}", self.hosts[host], path_and_query);
        let response = tokio::time::timeout(deadline, self.client.get(&url).send())
            .await
            .map_err(|_| ClientError::Timeout(url.clone()))??;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16(), url));
        }
        let parsed = tokio::time::timeout(deadline, response.json::<T>())
            .await
            .map_err(|_| ClientError::Timeout(url))??;
        Ok(parsed)
    }
}

#[async_trait]
impl SourceScraper for HttpScraper {
    async fn list_chapters(&self, source_url: &str) -> ClientResult<Vec<ChapterItem>> {
        if let Some(cached) = self.listings.get(source_url).await {
            return Ok(cached);
        }

        let host = self.pick_host()?;
        let encoded: String = url::form_urlencoded::byte_serialize(source_url.as_bytes()).collect();
        let mut chapters = Vec::new();
        let mut page = 1i64;
        let mut transient_retries = 0u32;

        loop {
            let path = format!("/api/manga/chapters?url={}&page={}", encoded, page);
            let response: ListChaptersResponse =
                match self.get_json(host, &path, self.fetch_timeout).await {
                    Ok(r) => r,
                    Err(e) => {
                        self.mark_failure(host);
                        return Err(e);
                    }
                };

            // The scraper answers "loading" / "not_cached" while it warms up
            // a listing; poll until it reports ready.
            match response.status.as_deref() {
                Some("loading") | Some("not_cached") => {
                    transient_retries += 1;
                    if transient_retries > TRANSIENT_RETRY_LIMIT {
                        self.mark_failure(host);
                        return Err(ClientError::Unavailable(format!(
                            "listing for {} never became ready",
                            source_url
                        )));
                    }
                    tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
                    continue;
                }
                _ => {}
            }

            let has_more = response.has_more;
            chapters.extend(response.data);
            if !has_more {
                break;
            }
            page += 1;
        }

        self.mark_success(host);
        self.listings
            .insert(source_url.to_string(), chapters.clone())
            .await;
        Ok(chapters)
    }

    async fn source_metadata(&self, source_url: &str) -> ClientResult<Option<SourceMetadata>> {
        let host = self.pick_host()?;
        let encoded: String = url::form_urlencoded::byte_serialize(source_url.as_bytes()).collect();
        let path = format!("/api/manga/metadata?url={}", encoded);

        let response: MetadataResponse = match self.get_json(host, &path, self.fetch_timeout).await
        {
            Ok(r) => r,
            Err(e) => {
                self.mark_failure(host);
                return Err(e);
            }
        };
        self.mark_success(host);

        match response.total {
            Some(total) => Ok(Some(SourceMetadata {
                last_chapter: response.last_chapter.and_then(|c| c.number),
                total,
            })),
            None => Ok(None),
        }
    }

    async fn chapter_images(&self, chapter_url: &str) -> ClientResult<Vec<ChapterImage>> {
        let host = self.pick_host()?;
        let encoded: String = url::form_urlencoded::byte_serialize(chapter_url.as_bytes()).collect();
        let path = format!("/api/chapter/images?url={}", encoded);

        let response: ChapterImagesResponse =
            match self.get_json(host, &path, self.scrape_timeout).await {
                Ok(r) => r,
                Err(e) => {
                    self.mark_failure(host);
                    return Err(e);
                }
            };
        self.mark_success(host);
        Ok(response.data)
    }

    async fn stage_chapter(&self, request: &StageRequest) -> ClientResult<StagedChapter> {
        let host = self.pick_host()?;
        let url = format!("{}/api/chapter/upload", self.hosts[host]);

        let send = self.client.post(&url).json(request).send();
        let response = match tokio::time::timeout(self.upload_timeout, send).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                self.mark_failure(host);
                return Err(e.into());
            }
            Err(_) => {
                self.mark_failure(host);
                return Err(ClientError::Timeout(url));
            }
        };
        if !response.status().is_success() {
            self.mark_failure(host);
            return Err(ClientError::Status(response.status().as_u16(), url));
        }

        let parsed: StageResponse = response.json().await.map_err(|e| {
            self.mark_failure(host);
            ClientError::Decode(e.to_string())
        })?;
        match (parsed.success, parsed.data) {
            (true, Some(data)) => {
                self.mark_success(host);
                Ok(StagedChapter {
                    zip_url: data.public_url,
                    file_name: data.file_name,
                    total_images: data.total_images,
                })
            }
            _ => {
                self.mark_failure(host);
                Err(ClientError::Unavailable(
                    parsed
                        .error
                        .unwrap_or_else(|| "stager reported failure".into()),
                ))
            }
        }
    }
}
