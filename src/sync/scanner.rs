use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::clients::{
    catalog, CatalogApi, ChapterItem, ClientError, NotificationGate, SourceScraper,
};
use crate::db::series::ScanResult;
use crate::db::{now, Registry};
use crate::events::{EventPublisher, EventType};
use crate::models::{NewTask, Series, SeriesSource, SeriesStatus, SourceScanStatus};
use crate::sync::chapter_number;

/// Discovers chapters missing from the backend and turns them into sync
/// tasks. One scan per due series, fanned out up to `max_concurrent`.
#[derive(Clone)]
pub struct Scanner {
    registry: Registry,
    scraper: Arc<dyn SourceScraper>,
    catalog: Arc<dyn CatalogApi>,
    events: EventPublisher,
    notifications: Arc<NotificationGate>,
    max_concurrent: usize,
}

struct ScanOutcome {
    status: SeriesStatus,
    missing: usize,
}

impl Scanner {
    pub fn new(
        registry: Registry,
        scraper: Arc<dyn SourceScraper>,
        catalog: Arc<dyn CatalogApi>,
        events: EventPublisher,
        notifications: Arc<NotificationGate>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            scraper,
            catalog,
            events,
            notifications,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn tick(&self) {
        let due = match self.registry.due_series().await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Failed to load due series: {}", e);
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        tracing::info!("Scanner picked up {} due series", due.len());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut scans = JoinSet::new();
        for series in due {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let scanner = self.clone();
            scans.spawn(async move {
                let _permit = permit;
                scanner.scan(series).await;
            });
        }
        while scans.join_next().await.is_some() {}
    }

    pub async fn scan(&self, series: Series) {
        let external_id = series.external_id.clone();
        if let Err(e) = self
            .registry
            .set_status(series.id, SeriesStatus::Scanning, None)
            .await
        {
            tracing::error!("Could not mark series {} scanning: {}", series.id, e);
            return;
        }
        self.events.emit(EventType::ScanStarted, &external_id, json!({}));

        match self.scan_inner(&series).await {
            Ok(outcome) => {
                tracing::info!(
                    "Scan of '{}' finished: {} missing chapter(s)",
                    series.title,
                    outcome.missing
                );
                self.events.emit(
                    EventType::ScanFinished,
                    &external_id,
                    json!({ "status": outcome.status, "missing": outcome.missing }),
                );
            }
            Err(message) => {
                tracing::warn!("Scan of '{}' failed: {}", series.title, message);
                if let Err(e) = self
                    .registry
                    .set_status(series.id, SeriesStatus::Error, Some(&message))
                    .await
                {
                    tracing::error!("Could not record scan failure for {}: {}", series.id, e);
                }
                if let Ok(Some(updated)) = self.registry.get_series(series.id).await {
                    self.notifications.series_failed(&updated, &message).await;
                }
                self.events
                    .emit(EventType::ScanFinished, &external_id, json!({ "error": message }));
            }
        }
    }

    async fn scan_inner(&self, series: &Series) -> Result<ScanOutcome, String> {
        let sources = self
            .registry
            .enabled_sources(series.id)
            .await
            .map_err(|e| e.to_string())?;
        if sources.is_empty() {
            return Err("no sources".to_string());
        }

        if let Some(outcome) = self.try_metadata_fast_path(series, &sources[0]).await {
            return Ok(outcome);
        }

        let listings = self.fetch_listings(&sources).await?;
        let successes: Vec<(usize, &Vec<ChapterItem>)> = listings
            .iter()
            .enumerate()
            .filter_map(|(index, listing)| listing.as_ref().map(|items| (index, items)))
            .collect();
        if successes.is_empty() {
            return Err("all sources failed".to_string());
        }

        // Sources sometimes lag behind each other; the fullest listing is
        // authoritative so a stale mirror cannot regress the series.
        let (selected_index, selected_items) = successes
            .iter()
            .copied()
            .max_by(|a, b| a.1.len().cmp(&b.1.len()).then(b.0.cmp(&a.0)))
            .unwrap();
        let selected_source = &sources[selected_index];

        let backend_numbers = catalog::all_chapter_numbers(&*self.catalog, &series.external_id)
            .await
            .map_err(|e| format!("failed to list backend chapters: {}", e))?;
        let backend_last = backend_numbers.iter().copied().fold(None, fold_max);
        self.registry
            .update_backend_stats(series.id, backend_numbers.len() as i64, backend_last)
            .await
            .map_err(|e| e.to_string())?;

        let backend_set: HashSet<u64> = backend_numbers.iter().map(|n| n.to_bits()).collect();
        let mut queued = HashSet::new();
        let mut missing = Vec::new();
        for (index, item) in selected_items.iter().enumerate() {
            let Some(number) = chapter_number::resolve(item) else {
                tracing::debug!("No chapter number for '{}' ({}), skipping", item.title, item.url);
                continue;
            };
            if backend_set.contains(&number.to_bits()) || !queued.insert(number.to_bits()) {
                continue;
            }
            missing.push(NewTask {
                chapter_url: item.url.clone(),
                chapter_number: number,
                weight: index as i64,
                source_id: Some(selected_source.id),
            });
        }

        let source_last = selected_items
            .iter()
            .filter_map(chapter_number::resolve)
            .fold(None, fold_max);
        self.registry
            .record_scan_result(
                series.id,
                &ScanResult {
                    source_chapter_count: selected_items.len() as i64,
                    source_last_chapter: source_last,
                    next_scan_at: next_scan_at(series),
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        if missing.is_empty() {
            return Ok(ScanOutcome {
                status: SeriesStatus::Idle,
                missing: 0,
            });
        }

        let inserted = self
            .registry
            .create_tasks(series.id, &missing)
            .await
            .map_err(|e| e.to_string())?;
        self.registry
            .set_status(series.id, SeriesStatus::Syncing, None)
            .await
            .map_err(|e| e.to_string())?;
        self.registry
            .increment_sync_total(series.id, inserted as i64)
            .await
            .map_err(|e| e.to_string())?;

        Ok(ScanOutcome {
            status: SeriesStatus::Syncing,
            missing: missing.len(),
        })
    }

    /// Cheap pre-check against the source metadata endpoint: when the source
    /// reports nothing beyond what we already mirrored, skip the full
    /// listing fetch. Any disagreement in counts falls through to the full
    /// scan, since gaps may hide in the middle.
    async fn try_metadata_fast_path(
        &self,
        series: &Series,
        primary: &SeriesSource,
    ) -> Option<ScanOutcome> {
        let known_last = series.source_last_chapter?;
        let meta = match self.scraper.source_metadata(&primary.url).await {
            Ok(Some(meta)) => meta,
            _ => return None,
        };
        let source_last = meta.last_chapter?;
        if source_last > known_last || meta.total != series.backend_chapter_count {
            return None;
        }

        self.registry
            .record_scan_result(
                series.id,
                &ScanResult {
                    source_chapter_count: meta.total,
                    source_last_chapter: Some(source_last),
                    next_scan_at: next_scan_at(series),
                },
            )
            .await
            .map_err(|e| tracing::error!("Failed to record fast-path scan: {}", e))
            .ok()?;

        tracing::debug!("Metadata fast path: '{}' is up to date", series.title);
        Some(ScanOutcome {
            status: SeriesStatus::Idle,
            missing: 0,
        })
    }

    /// Fetch every enabled source's listing concurrently, recording each
    /// source's scan outcome as it lands. `None` marks a failed source.
    async fn fetch_listings(
        &self,
        sources: &[SeriesSource],
    ) -> Result<Vec<Option<Vec<ChapterItem>>>, String> {
        let mut fetches = JoinSet::new();
        for (index, source) in sources.iter().enumerate() {
            let scraper = self.scraper.clone();
            let url = source.url.clone();
            fetches.spawn(async move { (index, scraper.list_chapters(&url).await) });
        }

        let mut listings: Vec<Option<Vec<ChapterItem>>> = (0..sources.len()).map(|_| None).collect();
        while let Some(joined) = fetches.join_next().await {
            let (index, result) = joined.map_err(|e| format!("listing task failed: {}", e))?;
            let source = &sources[index];
            match result {
                Ok(items) => {
                    let status = if items.is_empty() {
                        SourceScanStatus::Empty
                    } else {
                        SourceScanStatus::Success
                    };
                    let last = items.iter().filter_map(chapter_number::resolve).fold(None, fold_max);
                    self.registry
                        .record_source_scan(source.id, status, Some(items.len() as i64), last, None)
                        .await
                        .map_err(|e| e.to_string())?;
                    listings[index] = Some(items);
                }
                Err(e) => {
                    let status = match e {
                        ClientError::Timeout(_) => SourceScanStatus::Timeout,
                        _ => SourceScanStatus::Error,
                    };
                    tracing::warn!("Source {} failed to list: {}", source.url, e);
                    self.registry
                        .record_source_scan(source.id, status, None, None, Some(&e.to_string()))
                        .await
                        .map_err(|e| e.to_string())?;
                }
            }
        }
        Ok(listings)
    }
}

fn next_scan_at(series: &Series) -> chrono::NaiveDateTime {
    now() + chrono::Duration::minutes(series.check_interval_minutes.max(1))
}

fn fold_max(acc: Option<f64>, n: f64) -> Option<f64> {
    Some(match acc {
        Some(current) if current >= n => current,
        _ => n,
    })
}
