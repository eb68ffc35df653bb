use std::sync::Arc;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::clients::{
    CatalogApi, ChapterUploader, Invalidator, NewCatalogChapter, NotificationGate, SourceScraper,
    StageImage, StageRequest, UploadRequest,
};
use crate::config::Config;
use crate::db::Registry;
use crate::events::{EventPublisher, EventType};
use crate::models::{Series, SeriesStatus, SyncTask, TaskStatus};

const PARTIAL_FAILURE_MESSAGE: &str = "Some chapters failed to sync";

/// Drains pending sync tasks through the four-step pipeline: enumerate
/// images, stage an archive, persist it, register the chapter in the
/// catalog. Series run in parallel, chapters within one series do not.
#[derive(Clone)]
pub struct Processor {
    registry: Registry,
    scraper: Arc<dyn SourceScraper>,
    uploader: Arc<dyn ChapterUploader>,
    catalog: Arc<dyn CatalogApi>,
    events: EventPublisher,
    invalidator: Invalidator,
    notifications: Arc<NotificationGate>,
    config: Arc<Config>,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Registry,
        scraper: Arc<dyn SourceScraper>,
        uploader: Arc<dyn ChapterUploader>,
        catalog: Arc<dyn CatalogApi>,
        events: EventPublisher,
        invalidator: Invalidator,
        notifications: Arc<NotificationGate>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            registry,
            scraper,
            uploader,
            catalog,
            events,
            invalidator,
            notifications,
            config,
        }
    }

    pub async fn tick(&self) {
        if let Err(e) = self.registry.resolve_completed_syncing().await {
            tracing::error!("Failed to resolve completed syncing series: {}", e);
        }

        let series = match self.registry.series_with_active_tasks().await {
            Ok(series) => series,
            Err(e) => {
                tracing::error!("Failed to load series with active tasks: {}", e);
                return;
            }
        };
        if series.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_syncs.max(1)));
        let mut runs = JoinSet::new();
        for s in series {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let processor = self.clone();
            runs.spawn(async move {
                let _permit = permit;
                processor.process_series(s).await;
            });
        }
        while runs.join_next().await.is_some() {}
    }

    pub async fn process_series(&self, series: Series) {
        let budget = self.config.chapter_budget(&series.source_domain);
        let pending = match self.registry.pending_tasks(series.id, budget).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Failed to load pending tasks for {}: {}", series.id, e);
                return;
            }
        };

        if pending.is_empty() {
            self.finalize_series(&series).await;
            return;
        }

        let delay = self.config.inter_chapter_delay(&series.source_domain);
        for (index, task) in pending.iter().enumerate() {
            if index > 0 {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
            }
            self.process_task(&series, task).await;
        }
    }

    async fn process_task(&self, series: &Series, task: &SyncTask) {
        match self.run_pipeline(series, task).await {
            Ok(()) => {
                if let Err(e) = self
                    .registry
                    .set_task_status(task.id, TaskStatus::Completed, None, None)
                    .await
                {
                    tracing::error!("Could not complete task {}: {}", task.id, e);
                    return;
                }
                if let Err(e) = self.registry.refresh_sync_progress(series.id).await {
                    tracing::error!("Could not refresh progress for {}: {}", series.id, e);
                }
                self.invalidator
                    .schedule(format!("series:{}", series.external_id));
                self.invalidator.schedule(format!(
                    "chapter:{}:{}",
                    series.external_id,
                    chapter_number_string(task.chapter_number)
                ));
                self.events.emit(
                    EventType::SyncProgress,
                    &series.external_id,
                    json!({ "chapter_number": task.chapter_number, "status": "completed" }),
                );
                tracing::info!(
                    "Synced chapter {} of '{}'",
                    chapter_number_string(task.chapter_number),
                    series.title
                );
            }
            Err(message) => {
                tracing::warn!(
                    "Chapter {} of '{}' failed: {}",
                    chapter_number_string(task.chapter_number),
                    series.title,
                    message
                );
                if let Err(e) = self
                    .registry
                    .set_task_status(task.id, TaskStatus::Failed, None, Some(&message))
                    .await
                {
                    tracing::error!("Could not fail task {}: {}", task.id, e);
                }
                if let Err(e) = self.registry.refresh_sync_progress(series.id).await {
                    tracing::error!("Could not refresh progress for {}: {}", series.id, e);
                }
                self.events.emit(
                    EventType::SyncProgress,
                    &series.external_id,
                    json!({
                        "chapter_number": task.chapter_number,
                        "status": "failed",
                        "error": message,
                    }),
                );
            }
        }
    }

    /// Steps A through D for one chapter. A task that already carries a
    /// staged zip resumes at Step C instead of re-enumerating and
    /// re-staging.
    async fn run_pipeline(&self, series: &Series, task: &SyncTask) -> Result<(), String> {
        let zip_url = match &task.zip_url {
            Some(zip_url) => zip_url.clone(),
            None => {
                self.registry
                    .set_task_status(task.id, TaskStatus::Scraping, None, None)
                    .await
                    .map_err(|e| e.to_string())?;

                let images = self
                    .scraper
                    .chapter_images(&task.chapter_url)
                    .await
                    .map_err(|e| e.to_string())?;
                if images.is_empty() {
                    return Err("No images found for chapter".to_string());
                }

                let staged = self
                    .scraper
                    .stage_chapter(&StageRequest {
                        images: images
                            .iter()
                            .map(|image| StageImage {
                                index: image.index,
                                download_url: image.download_url.clone(),
                            })
                            .collect(),
                        series_external_id: series.external_id.clone(),
                        chapter_number: chapter_number_string(task.chapter_number),
                        series_title: series.title.clone(),
                        chapter_url: task.chapter_url.clone(),
                    })
                    .await
                    .map_err(|e| e.to_string())?;

                // Stored before the upload so a restart resumes at Step C.
                self.registry
                    .set_task_status(task.id, TaskStatus::Scraped, Some(&staged.zip_url), None)
                    .await
                    .map_err(|e| e.to_string())?;
                staged.zip_url
            }
        };

        self.registry
            .set_task_status(task.id, TaskStatus::Uploading, None, None)
            .await
            .map_err(|e| e.to_string())?;

        let uploaded = self
            .uploader
            .upload_single(&UploadRequest {
                zip_url,
                series_external_id: series.external_id.clone(),
                chapter_number: task.chapter_number,
            })
            .await
            .map_err(|e| e.to_string())?;

        self.catalog
            .create_chapters(
                &series.external_id,
                &[NewCatalogChapter {
                    chapter_id: uploaded.chapter_id,
                    chapter_number: task.chapter_number,
                    chapter_title: String::new(),
                    chapter_images: uploaded.images,
                    path: uploaded.path,
                    thumbnail_image_url: self.config.default_thumbnail_url.clone(),
                }],
            )
            .await
            .map_err(|e| e.to_string())?;

        self.registry
            .increment_backend_stats(series.id, task.chapter_number)
            .await
            .map_err(|e| e.to_string())?;

        Ok(())
    }

    /// No pending work left: close the batch. Idempotent when the series is
    /// already settled.
    async fn finalize_series(&self, series: &Series) {
        let tasks = match self.registry.tasks_for_series(series.id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!("Failed to inspect tasks for {}: {}", series.id, e);
                return;
            }
        };
        if tasks.iter().any(|t| t.status.is_active()) {
            return;
        }

        let any_failed = tasks.iter().any(|t| t.status == TaskStatus::Failed);
        let result = if any_failed {
            self.registry
                .set_status(series.id, SeriesStatus::Error, Some(PARTIAL_FAILURE_MESSAGE))
                .await
        } else {
            match self.registry.set_status(series.id, SeriesStatus::Idle, None).await {
                Ok(()) => self.registry.set_last_synced(series.id).await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = result {
            tracing::error!("Could not finalize series {}: {}", series.id, e);
            return;
        }
        if let Err(e) = self.registry.refresh_sync_progress(series.id).await {
            tracing::error!("Could not refresh progress for {}: {}", series.id, e);
        }

        if any_failed {
            if let Ok(Some(updated)) = self.registry.get_series(series.id).await {
                self.notifications
                    .series_failed(&updated, PARTIAL_FAILURE_MESSAGE)
                    .await;
            }
        } else {
            tracing::info!("Series '{}' fully synced", series.title);
        }
    }
}

/// "36" for whole chapters, "36.5" for fractional ones; the stager expects
/// the number as a string.
pub fn chapter_number_string(number: f64) -> String {
    if number.fract() == 0.0 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}
