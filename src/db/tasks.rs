use std::collections::HashSet;

use crate::db::{now, Registry, RegistryResult};
use crate::models::{NewTask, SyncTask, TaskStatus};

/// What startup recovery touched, for the boot log.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub tasks_resumed: u64,
    pub tasks_restarted: u64,
    pub series_recomputed: u64,
}

impl Registry {
    /// Bulk-insert scanner output. A task that already exists for the same
    /// (series, chapter_number) only gets its `updated_at` bumped. Returns the
    /// number of rows actually inserted.
    pub async fn create_tasks(&self, series_id: i64, tasks: &[NewTask]) -> RegistryResult<u64> {
        if tasks.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool().begin().await?;
        let existing: Vec<f64> =
            sqlx::query_scalar("SELECT chapter_number FROM sync_task WHERE series_id = ?")
                .bind(series_id)
                .fetch_all(&mut *tx)
                .await?;
        let existing: HashSet<u64> = existing.iter().map(|n| n.to_bits()).collect();

        let ts = now();
        let mut inserted = 0u64;
        for task in tasks {
            sqlx::query(
                "INSERT INTO sync_task (series_id, source_id, chapter_url, chapter_number, weight, status, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, 'pending', ?, ?) \
                 ON CONFLICT (series_id, chapter_number) DO UPDATE SET updated_at = excluded.updated_at",
            )
            .bind(series_id)
            .bind(task.source_id)
            .bind(&task.chapter_url)
            .bind(task.chapter_number)
            .bind(task.weight)
            .bind(ts)
            .bind(ts)
            .execute(&mut *tx)
            .await?;

            if !existing.contains(&task.chapter_number.to_bits()) {
                inserted += 1;
            }
        }
        tx.commit().await?;

        Ok(inserted)
    }

    pub async fn pending_tasks(&self, series_id: i64, limit: i64) -> RegistryResult<Vec<SyncTask>> {
        let tasks = sqlx::query_as::<_, SyncTask>(
            "SELECT * FROM sync_task WHERE series_id = ? AND status = 'pending' \
             ORDER BY weight ASC LIMIT ?",
        )
        .bind(series_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(tasks)
    }

    pub async fn tasks_for_series(&self, series_id: i64) -> RegistryResult<Vec<SyncTask>> {
        let tasks = sqlx::query_as::<_, SyncTask>(
            "SELECT * FROM sync_task WHERE series_id = ? ORDER BY weight ASC",
        )
        .bind(series_id)
        .fetch_all(self.pool())
        .await?;
        Ok(tasks)
    }

    pub async fn failed_tasks(&self, series_id: i64) -> RegistryResult<Vec<SyncTask>> {
        let tasks = sqlx::query_as::<_, SyncTask>(
            "SELECT * FROM sync_task WHERE series_id = ? AND status = 'failed' \
             ORDER BY weight ASC",
        )
        .bind(series_id)
        .fetch_all(self.pool())
        .await?;
        Ok(tasks)
    }

    /// Move a task along the pipeline. Passing `None` for `zip_url` keeps the
    /// stored value so a restarted pipeline can resume after staging; the
    /// error column always takes the passed value. Failing increments
    /// `retry_count`.
    pub async fn set_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        zip_url: Option<&str>,
        error: Option<&str>,
    ) -> RegistryResult<()> {
        let bump = if status == TaskStatus::Failed { 1i64 } else { 0 };
        sqlx::query(
            "UPDATE sync_task SET status = ?, zip_url = COALESCE(?, zip_url), error = ?, \
             retry_count = retry_count + ?, updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(zip_url)
        .bind(error)
        .bind(bump)
        .bind(now())
        .bind(task_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Flip every failed task back to pending; a touched series goes back to
    /// `syncing` so the next processor tick picks it up.
    pub async fn retry_failed(&self, series_id: i64) -> RegistryResult<u64> {
        let ts = now();
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query(
            "UPDATE sync_task SET status = 'pending', error = NULL, updated_at = ? \
             WHERE series_id = ? AND status = 'failed'",
        )
        .bind(ts)
        .bind(series_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            sqlx::query("UPDATE series SET status = 'syncing', updated_at = ? WHERE id = ?")
                .bind(ts)
                .bind(series_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    /// Startup repair, run once before the tickers start. Tasks interrupted
    /// mid-pipeline resume after staging when a zip is already stored and
    /// restart from the beginning otherwise; series statuses are recomputed
    /// from their tasks.
    pub async fn recover_stale_tasks(&self) -> RegistryResult<RecoveryReport> {
        let ts = now();
        let mut report = RecoveryReport::default();

        report.tasks_resumed = sqlx::query(
            "UPDATE sync_task SET status = 'scraped', updated_at = ? \
             WHERE status IN ('scraping', 'uploading') AND zip_url IS NOT NULL",
        )
        .bind(ts)
        .execute(self.pool())
        .await?
        .rows_affected();

        report.tasks_restarted = sqlx::query(
            "UPDATE sync_task SET status = 'pending', updated_at = ? \
             WHERE status IN ('scraping', 'uploading') AND zip_url IS NULL",
        )
        .bind(ts)
        .execute(self.pool())
        .await?
        .rows_affected();

        let interrupted = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM series WHERE status IN ('scanning', 'syncing')",
        )
        .fetch_all(self.pool())
        .await?;

        for id in &interrupted {
            let active = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM sync_task WHERE series_id = ? \
                 AND status IN ('pending', 'scraping', 'scraped', 'uploading')",
            )
            .bind(id)
            .fetch_one(self.pool())
            .await?;
            let failed = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM sync_task WHERE series_id = ? AND status = 'failed'",
            )
            .bind(id)
            .fetch_one(self.pool())
            .await?;

            if active > 0 {
                sqlx::query("UPDATE series SET status = 'syncing', updated_at = ? WHERE id = ?")
                    .bind(ts)
                    .bind(id)
                    .execute(self.pool())
                    .await?;
            } else if failed > 0 {
                sqlx::query("UPDATE series SET status = 'error', updated_at = ? WHERE id = ?")
                    .bind(ts)
                    .bind(id)
                    .execute(self.pool())
                    .await?;
            } else {
                sqlx::query(
                    "UPDATE series SET status = 'idle', last_synced_at = COALESCE(last_synced_at, ?), \
                     updated_at = ? WHERE id = ?",
                )
                .bind(ts)
                .bind(ts)
                .bind(id)
                .execute(self.pool())
                .await?;
            }
        }
        report.series_recomputed = interrupted.len() as u64;

        Ok(report)
    }
}
