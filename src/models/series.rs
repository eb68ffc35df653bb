use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::models::source::SeriesSource;

/// Sync aggregate for a series. `Scanning` and `Syncing` are transient and
/// resolved by the scanner / processor; `Error` requires a retry or rescan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    Idle,
    Scanning,
    Syncing,
    Error,
}

impl SeriesStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesStatus::Idle => "idle",
            SeriesStatus::Scanning => "scanning",
            SeriesStatus::Syncing => "syncing",
            SeriesStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Series {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub manga_url: String,
    pub source_domain: String,
    pub manga_slug: String,
    pub auto_sync_enabled: bool,
    pub check_interval_minutes: i64,
    pub priority: i64,
    pub source_chapter_count: i64,
    pub source_last_chapter: Option<f64>,
    pub backend_chapter_count: i64,
    pub backend_last_chapter: Option<f64>,
    pub status: SeriesStatus,
    pub sync_progress_total: i64,
    pub sync_progress_completed: i64,
    pub sync_progress_failed: i64,
    pub last_scanned_at: Option<NaiveDateTime>,
    pub last_synced_at: Option<NaiveDateTime>,
    pub next_scan_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub last_error_at: Option<NaiveDateTime>,
    pub consecutive_failures: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A series together with its registered sources, as returned by the API.
#[derive(Debug, Serialize, ToSchema)]
pub struct SeriesWithSources {
    #[serde(flatten)]
    pub series: Series,
    pub sources: Vec<SeriesSource>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateSeries {
    pub external_id: String,
    pub title: String,
    pub source_urls: Vec<String>,
    pub check_interval_minutes: Option<i64>,
    pub priority: Option<i64>,
    pub auto_sync_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateSeries {
    pub title: Option<String>,
    pub source_urls: Option<Vec<String>>,
    pub check_interval_minutes: Option<i64>,
    pub priority: Option<i64>,
    pub auto_sync_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SeriesFilter {
    pub status: Option<SeriesStatus>,
    pub title: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}
