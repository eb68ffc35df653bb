use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Scraping,
    Scraped,
    Uploading,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// A task in one of these states still holds the series in `syncing`.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Scraping | TaskStatus::Scraped | TaskStatus::Uploading
        )
    }
}

/// One missing chapter on its way into the backend catalog.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct SyncTask {
    pub id: i64,
    pub series_id: i64,
    pub source_id: Option<i64>,
    pub chapter_url: String,
    pub chapter_number: f64,
    pub weight: i64,
    pub status: TaskStatus,
    pub zip_url: Option<String>,
    pub error: Option<String>,
    pub retry_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Scanner output: a chapter missing from the backend, queued for the processor.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub chapter_url: String,
    pub chapter_number: f64,
    pub weight: i64,
    pub source_id: Option<i64>,
}
