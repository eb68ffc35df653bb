use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Outcome of the most recent listing fetch against one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceScanStatus {
    Success,
    Empty,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct SeriesSource {
    pub id: i64,
    pub series_id: i64,
    pub url: String,
    pub domain: String,
    pub slug: String,
    pub priority: i64,
    pub is_enabled: bool,
    pub last_chapter_count: Option<i64>,
    pub last_chapter_number: Option<f64>,
    pub last_scan_status: Option<SourceScanStatus>,
    pub last_scan_error: Option<String>,
    pub last_scan_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A source URL after trim / parse / dedupe, ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSource {
    pub url: String,
    pub domain: String,
    pub slug: String,
}
