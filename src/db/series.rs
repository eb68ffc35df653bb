use chrono::NaiveDateTime;

use crate::db::sources::{normalize_source_urls, write_sources};
use crate::db::{now, Registry, RegistryError, RegistryResult};
use crate::models::{
    CreateSeries, Paginated, Series, SeriesFilter, SeriesStatus, SeriesWithSources, UpdateSeries,
};

/// Counters and schedule written back by a scan that reached the
/// compute-missing stage.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub source_chapter_count: i64,
    pub source_last_chapter: Option<f64>,
    pub next_scan_at: NaiveDateTime,
}

impl Registry {
    pub async fn create_series(&self, payload: &CreateSeries) -> RegistryResult<SeriesWithSources> {
        let normalized = normalize_source_urls(&payload.source_urls)?;

        let mut tx = self.pool().begin().await?;
        let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM series WHERE external_id = ?")
            .bind(&payload.external_id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(RegistryError::AlreadyRegistered(payload.external_id.clone()));
        }

        let ts = now();
        let series_id = sqlx::query(
            "INSERT INTO series (external_id, title, auto_sync_enabled, check_interval_minutes, priority, \
             status, next_scan_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 'idle', ?, ?, ?)",
        )
        .bind(&payload.external_id)
        .bind(&payload.title)
        .bind(payload.auto_sync_enabled.unwrap_or(true))
        .bind(payload.check_interval_minutes.unwrap_or(360).max(1))
        .bind(payload.priority.unwrap_or(0))
        .bind(ts)
        .bind(ts)
        .bind(ts)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        write_sources(&mut tx, series_id, &normalized).await?;
        tx.commit().await?;

        let series = self
            .get_series(series_id)
            .await?
            .ok_or(RegistryError::NotFound)?;
        let sources = self.sources_for_series(series_id).await?;
        Ok(SeriesWithSources { series, sources })
    }

    pub async fn get_series(&self, id: i64) -> RegistryResult<Option<Series>> {
        let series = sqlx::query_as::<_, Series>("SELECT * FROM series WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(series)
    }

    pub async fn get_series_by_external_id(
        &self,
        external_id: &str,
    ) -> RegistryResult<Option<Series>> {
        let series = sqlx::query_as::<_, Series>("SELECT * FROM series WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(series)
    }

    pub async fn list_series(&self, filter: &SeriesFilter) -> RegistryResult<Paginated<Series>> {
        let page = filter.page.unwrap_or(1).max(1);
        let page_size = filter.page_size.unwrap_or(20).clamp(1, 100);

        let mut conditions = Vec::new();
        if filter.status.is_some() {
            conditions.push("status = ?");
        }
        if filter.title.is_some() {
            conditions.push("title LIKE ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_query = format!("SELECT COUNT(*) FROM series{}", where_clause);
        let mut count = sqlx::query_scalar::<_, i64>(&count_query);
        if let Some(status) = filter.status {
            count = count.bind(status);
        }
        if let Some(title) = &filter.title {
            count = count.bind(format!("%{}%", title));
        }
        let total = count.fetch_one(self.pool()).await?;

        let list_query = format!(
            "SELECT * FROM series{} ORDER BY priority DESC, id ASC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut list = sqlx::query_as::<_, Series>(&list_query);
        if let Some(status) = filter.status {
            list = list.bind(status);
        }
        if let Some(title) = &filter.title {
            list = list.bind(format!("%{}%", title));
        }
        let items = list
            .bind(page_size)
            .bind((page - 1) * page_size)
            .fetch_all(self.pool())
            .await?;

        Ok(Paginated {
            items,
            total,
            page,
            page_size,
        })
    }

    pub async fn update_series(
        &self,
        id: i64,
        patch: &UpdateSeries,
    ) -> RegistryResult<SeriesWithSources> {
        let normalized = match &patch.source_urls {
            Some(urls) => Some(normalize_source_urls(urls)?),
            None => None,
        };

        let mut tx = self.pool().begin().await?;
        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM series WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(RegistryError::NotFound);
        }

        let mut updates = Vec::new();
        if patch.title.is_some() {
            updates.push("title = ?");
        }
        if patch.check_interval_minutes.is_some() {
            updates.push("check_interval_minutes = ?");
        }
        if patch.priority.is_some() {
            updates.push("priority = ?");
        }
        if patch.auto_sync_enabled.is_some() {
            updates.push("auto_sync_enabled = ?");
        }
        if !updates.is_empty() {
            updates.push("updated_at = ?");
            let query = format!("UPDATE series SET {} WHERE id = ?", updates.join(", "));
            let mut q = sqlx::query(&query);
            if let Some(title) = &patch.title {
                q = q.bind(title);
            }
            if let Some(interval) = patch.check_interval_minutes {
                q = q.bind(interval.max(1));
            }
            if let Some(priority) = patch.priority {
                q = q.bind(priority);
            }
            if let Some(enabled) = patch.auto_sync_enabled {
                q = q.bind(enabled);
            }
            q.bind(now()).bind(id).execute(&mut *tx).await?;
        }

        if let Some(normalized) = &normalized {
            write_sources(&mut tx, id, normalized).await?;
        }
        tx.commit().await?;

        let series = self.get_series(id).await?.ok_or(RegistryError::NotFound)?;
        let sources = self.sources_for_series(id).await?;
        Ok(SeriesWithSources { series, sources })
    }

    pub async fn delete_series(&self, id: i64) -> RegistryResult<bool> {
        let result = sqlx::query("DELETE FROM series WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition the sync aggregate. A non-empty error message also records
    /// the failure and bumps `consecutive_failures`.
    pub async fn set_status(
        &self,
        id: i64,
        status: SeriesStatus,
        error: Option<&str>,
    ) -> RegistryResult<()> {
        let ts = now();
        match error.filter(|e| !e.is_empty()) {
            Some(message) => {
                sqlx::query(
                    "UPDATE series SET status = ?, last_error = ?, last_error_at = ?, \
                     consecutive_failures = consecutive_failures + 1, updated_at = ? WHERE id = ?",
                )
                .bind(status)
                .bind(message)
                .bind(ts)
                .bind(ts)
                .bind(id)
                .execute(self.pool())
                .await?;
            }
            None => {
                sqlx::query("UPDATE series SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(status)
                    .bind(ts)
                    .bind(id)
                    .execute(self.pool())
                    .await?;
            }
        }
        Ok(())
    }

    /// A scan reached the compute-missing stage: persist counters, clear the
    /// failure streak, and release `scanning` back to `idle`. The conditional
    /// status update never overrides a concurrent transition to `syncing`.
    pub async fn record_scan_result(&self, id: i64, result: &ScanResult) -> RegistryResult<()> {
        let ts = now();
        sqlx::query(
            "UPDATE series SET source_chapter_count = ?, source_last_chapter = ?, next_scan_at = ?, \
             last_scanned_at = ?, consecutive_failures = 0, last_error = NULL, last_error_at = NULL, \
             status = CASE WHEN status = 'scanning' THEN 'idle' ELSE status END, updated_at = ? \
             WHERE id = ?",
        )
        .bind(result.source_chapter_count)
        .bind(result.source_last_chapter)
        .bind(result.next_scan_at)
        .bind(ts)
        .bind(ts)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn update_backend_stats(
        &self,
        id: i64,
        chapter_count: i64,
        last_chapter: Option<f64>,
    ) -> RegistryResult<()> {
        sqlx::query(
            "UPDATE series SET backend_chapter_count = ?, backend_last_chapter = ?, updated_at = ? WHERE id = ?",
        )
        .bind(chapter_count)
        .bind(last_chapter)
        .bind(now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn increment_backend_stats(&self, id: i64, chapter_number: f64) -> RegistryResult<()> {
        sqlx::query(
            "UPDATE series SET backend_chapter_count = backend_chapter_count + 1, \
             backend_last_chapter = MAX(COALESCE(backend_last_chapter, -1.0), ?), updated_at = ? WHERE id = ?",
        )
        .bind(chapter_number)
        .bind(now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn increment_sync_total(&self, id: i64, delta: i64) -> RegistryResult<()> {
        sqlx::query(
            "UPDATE series SET sync_progress_total = sync_progress_total + ?, updated_at = ? WHERE id = ?",
        )
        .bind(delta)
        .bind(now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Recompute the completed / failed counters from the task table.
    pub async fn refresh_sync_progress(&self, id: i64) -> RegistryResult<()> {
        sqlx::query(
            "UPDATE series SET \
             sync_progress_completed = (SELECT COUNT(*) FROM sync_task WHERE series_id = ? AND status IN ('completed', 'skipped')), \
             sync_progress_failed = (SELECT COUNT(*) FROM sync_task WHERE series_id = ? AND status = 'failed'), \
             updated_at = ? WHERE id = ?",
        )
        .bind(id)
        .bind(id)
        .bind(now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_last_synced(&self, id: i64) -> RegistryResult<()> {
        let ts = now();
        sqlx::query("UPDATE series SET last_synced_at = ?, updated_at = ? WHERE id = ?")
            .bind(ts)
            .bind(ts)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Schedule an immediate rescan. Clears the status to `idle` unless a
    /// scan or sync is in flight; forcing while busy is an idempotent no-op
    /// on the status.
    pub async fn trigger_force_scan(&self, id: i64) -> RegistryResult<bool> {
        let ts = now();
        let result = sqlx::query(
            "UPDATE series SET next_scan_at = ?, \
             status = CASE WHEN status IN ('scanning', 'syncing') THEN status ELSE 'idle' END, \
             updated_at = ? WHERE id = ?",
        )
        .bind(ts)
        .bind(ts)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Auto-enabled idle series whose scan is due, most important first.
    pub async fn due_series(&self) -> RegistryResult<Vec<Series>> {
        let series = sqlx::query_as::<_, Series>(
            "SELECT * FROM series WHERE auto_sync_enabled = 1 AND status = 'idle' \
             AND next_scan_at IS NOT NULL AND next_scan_at <= ? \
             ORDER BY priority DESC, next_scan_at ASC",
        )
        .bind(now())
        .fetch_all(self.pool())
        .await?;
        Ok(series)
    }

    pub async fn series_with_active_tasks(&self) -> RegistryResult<Vec<Series>> {
        let series = sqlx::query_as::<_, Series>(
            "SELECT * FROM series WHERE status = 'syncing' AND EXISTS \
             (SELECT 1 FROM sync_task WHERE sync_task.series_id = series.id \
              AND sync_task.status IN ('pending', 'scraping', 'scraped', 'uploading')) \
             ORDER BY priority DESC, id ASC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(series)
    }

    /// Sweep series stuck in `syncing` whose tasks all reached terminal
    /// states and flip them to `error` or `idle`.
    pub async fn resolve_completed_syncing(&self) -> RegistryResult<u64> {
        let stuck = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM series WHERE status = 'syncing' AND NOT EXISTS \
             (SELECT 1 FROM sync_task WHERE sync_task.series_id = series.id \
              AND sync_task.status IN ('pending', 'scraping', 'scraped', 'uploading'))",
        )
        .fetch_all(self.pool())
        .await?;

        for id in &stuck {
            let failed = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM sync_task WHERE series_id = ? AND status = 'failed'",
            )
            .bind(id)
            .fetch_one(self.pool())
            .await?;

            if failed > 0 {
                self.set_status(*id, SeriesStatus::Error, Some("Some chapters failed to sync"))
                    .await?;
            } else {
                self.set_status(*id, SeriesStatus::Idle, None).await?;
                self.set_last_synced(*id).await?;
            }
            self.refresh_sync_progress(*id).await?;
        }

        Ok(stuck.len() as u64)
    }
}
