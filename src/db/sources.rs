use std::collections::HashSet;

use sqlx::{Sqlite, Transaction};
use url::Url;

use crate::db::{now, Registry, RegistryError, RegistryResult};
use crate::models::{NormalizedSource, SeriesSource, SourceScanStatus};

const MAX_SOURCES: usize = 3;

/// Trim, parse, and dedupe raw source URLs. Priorities follow input order.
pub fn normalize_source_urls(urls: &[String]) -> RegistryResult<Vec<NormalizedSource>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for raw in urls {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed = Url::parse(trimmed)
            .map_err(|_| RegistryError::InvalidSource(format!("not a valid URL: {}", trimmed)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RegistryError::InvalidSource(format!(
                "unsupported scheme in {}",
                trimmed
            )));
        }
        let domain = parsed
            .host_str()
            .ok_or_else(|| {
                RegistryError::InvalidSource(format!("missing hostname in {}", trimmed))
            })?
            .to_string();
        let slug = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .unwrap_or_default()
            .to_string();
        let url = parsed.to_string();
        if seen.insert(url.clone()) {
            out.push(NormalizedSource { url, domain, slug });
        }
    }

    if out.is_empty() || out.len() > MAX_SOURCES {
        return Err(RegistryError::InvalidSource(format!(
            "a series requires between 1 and {} unique source URLs",
            MAX_SOURCES
        )));
    }

    Ok(out)
}

/// Replace the hostname of `url`, leaving path, query, and fragment untouched.
pub fn swap_host(url: &str, new_domain: &str) -> RegistryResult<String> {
    let mut parsed = Url::parse(url)
        .map_err(|_| RegistryError::InvalidSource(format!("not a valid URL: {}", url)))?;
    parsed
        .set_host(Some(new_domain))
        .map_err(|_| RegistryError::InvalidSource(format!("not a valid hostname: {}", new_domain)))?;
    Ok(parsed.to_string())
}

/// Rewrites every source under `old_domain` to `new_domain`; dry runs return
/// the preview only.
#[derive(Debug)]
pub struct DomainMigrationPreview {
    pub affected_count: i64,
    pub sample: Vec<UrlRewrite>,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct UrlRewrite {
    pub old_url: String,
    pub new_url: String,
}

impl Registry {
    pub async fn replace_sources(
        &self,
        series_id: i64,
        urls: &[String],
    ) -> RegistryResult<Vec<SeriesSource>> {
        let normalized = normalize_source_urls(urls)?;

        let mut tx = self.pool().begin().await?;
        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM series WHERE id = ?")
            .bind(series_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(RegistryError::NotFound);
        }
        write_sources(&mut tx, series_id, &normalized).await?;
        tx.commit().await?;

        self.sources_for_series(series_id).await
    }

    pub async fn sources_for_series(&self, series_id: i64) -> RegistryResult<Vec<SeriesSource>> {
        let sources = sqlx::query_as::<_, SeriesSource>(
            "SELECT * FROM series_source WHERE series_id = ? ORDER BY priority ASC",
        )
        .bind(series_id)
        .fetch_all(self.pool())
        .await?;
        Ok(sources)
    }

    pub async fn enabled_sources(&self, series_id: i64) -> RegistryResult<Vec<SeriesSource>> {
        let sources = sqlx::query_as::<_, SeriesSource>(
            "SELECT * FROM series_source WHERE series_id = ? AND is_enabled = 1 ORDER BY priority ASC",
        )
        .bind(series_id)
        .fetch_all(self.pool())
        .await?;
        Ok(sources)
    }

    /// Record the outcome of one listing fetch against one source.
    pub async fn record_source_scan(
        &self,
        source_id: i64,
        status: SourceScanStatus,
        chapter_count: Option<i64>,
        last_chapter: Option<f64>,
        error: Option<&str>,
    ) -> RegistryResult<()> {
        let ts = now();
        sqlx::query(
            "UPDATE series_source SET last_scan_status = ?, last_chapter_count = COALESCE(?, last_chapter_count), \
             last_chapter_number = COALESCE(?, last_chapter_number), last_scan_error = ?, last_scan_at = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(status)
        .bind(chapter_count)
        .bind(last_chapter)
        .bind(error)
        .bind(ts)
        .bind(ts)
        .bind(source_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn preview_domain_migration(
        &self,
        old_domain: &str,
        new_domain: &str,
        series_ids: Option<&[i64]>,
    ) -> RegistryResult<DomainMigrationPreview> {
        let rewrites = self.domain_rewrites(old_domain, new_domain, series_ids).await?;
        Ok(DomainMigrationPreview {
            affected_count: rewrites.len() as i64,
            sample: rewrites
                .into_iter()
                .map(|(_, _, rewrite)| rewrite)
                .take(10)
                .collect(),
        })
    }

    pub async fn apply_domain_migration(
        &self,
        old_domain: &str,
        new_domain: &str,
        series_ids: Option<&[i64]>,
    ) -> RegistryResult<u64> {
        let rewrites = self.domain_rewrites(old_domain, new_domain, series_ids).await?;
        let ts = now();

        let mut tx = self.pool().begin().await?;
        for (source_id, series_id, rewrite) in &rewrites {
            sqlx::query(
                "UPDATE series_source SET url = ?, domain = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&rewrite.new_url)
            .bind(new_domain)
            .bind(ts)
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

            // Series whose primary source moved carry denormalized copies.
            sqlx::query(
                "UPDATE series SET manga_url = ?, source_domain = ?, updated_at = ? \
                 WHERE id = ? AND EXISTS (SELECT 1 FROM series_source WHERE id = ? AND priority = 1)",
            )
            .bind(&rewrite.new_url)
            .bind(new_domain)
            .bind(ts)
            .bind(series_id)
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(rewrites.len() as u64)
    }

    async fn domain_rewrites(
        &self,
        old_domain: &str,
        new_domain: &str,
        series_ids: Option<&[i64]>,
    ) -> RegistryResult<Vec<(i64, i64, UrlRewrite)>> {
        let mut query =
            String::from("SELECT id, series_id, url FROM series_source WHERE domain = ?");
        if let Some(ids) = series_ids {
            let placeholders = vec!["?"; ids.len()].join(", ");
            query.push_str(&format!(" AND series_id IN ({})", placeholders));
        }
        query.push_str(" ORDER BY id ASC");

        let mut q = sqlx::query_as::<_, (i64, i64, String)>(&query).bind(old_domain);
        if let Some(ids) = series_ids {
            for id in ids {
                q = q.bind(id);
            }
        }
        let rows = q.fetch_all(self.pool()).await?;

        let mut rewrites = Vec::with_capacity(rows.len());
        for (source_id, series_id, old_url) in rows {
            let new_url = swap_host(&old_url, new_domain)?;
            rewrites.push((source_id, series_id, UrlRewrite { old_url, new_url }));
        }
        Ok(rewrites)
    }
}

/// Atomically replace a series' source set and resync the denormalized
/// primary-source columns. Runs inside the caller's transaction.
pub(crate) async fn write_sources(
    tx: &mut Transaction<'_, Sqlite>,
    series_id: i64,
    normalized: &[NormalizedSource],
) -> Result<(), sqlx::Error> {
    let ts = now();

    sqlx::query("DELETE FROM series_source WHERE series_id = ?")
        .bind(series_id)
        .execute(&mut **tx)
        .await?;

    for (index, source) in normalized.iter().enumerate() {
        sqlx::query(
            "INSERT INTO series_source (series_id, url, domain, slug, priority, is_enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(series_id)
        .bind(&source.url)
        .bind(&source.domain)
        .bind(&source.slug)
        .bind((index + 1) as i64)
        .bind(ts)
        .bind(ts)
        .execute(&mut **tx)
        .await?;
    }

    let primary = &normalized[0];
    sqlx::query(
        "UPDATE series SET manga_url = ?, source_domain = ?, manga_slug = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&primary.url)
    .bind(&primary.domain)
    .bind(&primary.slug)
    .bind(ts)
    .bind(series_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
