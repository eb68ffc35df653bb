use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Result};

/// Per-source-domain processing limits, parsed from `DOMAIN_RATE_LIMITS`
/// ("domain=max_chapters:delay_ms,..."). Domains without an entry use the
/// global chapter budget and no inter-chapter delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainRateLimit {
    pub max_concurrent_chapters: i64,
    pub inter_chapter_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    pub scraper_base_urls: Vec<String>,
    pub uploader_base_url: String,
    pub catalog_base_url: String,
    pub cache_purge_base_url: Option<String>,
    pub realtime_base_url: Option<String>,
    pub notify_webhook_url: Option<String>,

    pub admin_api_key: String,
    pub uploader_api_key: String,
    pub catalog_api_key: String,
    pub cache_purge_api_key: String,
    pub realtime_api_key: String,

    pub scanner_interval: Duration,
    pub processor_interval: Duration,
    pub max_concurrent_scans: usize,
    pub max_concurrent_syncs: usize,
    pub default_chapters_per_series: i64,

    pub fetch_timeout: Duration,
    pub scrape_timeout: Duration,
    pub upload_timeout: Duration,

    pub max_task_retries: i64,
    pub notify_after_failures: i64,
    pub notification_cooldown: Duration,
    pub default_thumbnail_url: String,

    pub domain_rate_limits: HashMap<String, DomainRateLimit>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let admin_api_key = match std::env::var("ADMIN_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("ADMIN_API_KEY must be set"),
        };

        Ok(Self {
            host: env_string("HOST", "0.0.0.0"),
            port: env_parse("PORT", 3000),
            database_url: env_string("DATABASE_URL", "sqlite:data/manga-mirror.db"),

            scraper_base_urls: env_string("SCRAPER_BASE_URLS", "")
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            uploader_base_url: env_string("UPLOADER_BASE_URL", ""),
            catalog_base_url: env_string("CATALOG_BASE_URL", ""),
            cache_purge_base_url: env_optional("CACHE_PURGE_BASE_URL"),
            realtime_base_url: env_optional("REALTIME_BASE_URL"),
            notify_webhook_url: env_optional("NOTIFY_WEBHOOK_URL"),

            admin_api_key,
            uploader_api_key: env_string("UPLOADER_API_KEY", ""),
            catalog_api_key: env_string("CATALOG_API_KEY", ""),
            cache_purge_api_key: env_string("CACHE_PURGE_API_KEY", ""),
            realtime_api_key: env_string("REALTIME_API_KEY", ""),

            scanner_interval: Duration::from_millis(env_parse("SCANNER_INTERVAL_MS", 60_000)),
            processor_interval: Duration::from_millis(env_parse("PROCESSOR_INTERVAL_MS", 10_000)),
            max_concurrent_scans: env_parse("MAX_CONCURRENT_SCANS", 5),
            max_concurrent_syncs: env_parse("MAX_CONCURRENT_SYNCS", 5),
            default_chapters_per_series: env_parse("DEFAULT_CHAPTERS_PER_SERIES", 3),

            fetch_timeout: Duration::from_millis(env_parse("FETCH_TIMEOUT_MS", 30_000)),
            scrape_timeout: Duration::from_millis(env_parse("SCRAPE_TIMEOUT_MS", 60_000)),
            upload_timeout: Duration::from_millis(env_parse("UPLOAD_TIMEOUT_MS", 120_000)),

            max_task_retries: env_parse("MAX_TASK_RETRIES", 3),
            notify_after_failures: env_parse("NOTIFY_AFTER_FAILURES", 3),
            notification_cooldown: Duration::from_millis(env_parse(
                "NOTIFICATION_COOLDOWN_MS",
                3_600_000,
            )),
            default_thumbnail_url: env_string("DEFAULT_THUMBNAIL_URL", ""),

            domain_rate_limits: parse_domain_rate_limits(&env_string("DOMAIN_RATE_LIMITS", "")),
        })
    }

    /// Chapter budget for one processor pass over a series: the global
    /// default, narrowed by the source domain's own cap when one is set.
    pub fn chapter_budget(&self, source_domain: &str) -> i64 {
        match self.domain_rate_limits.get(source_domain) {
            Some(limit) => limit
                .max_concurrent_chapters
                .min(self.default_chapters_per_series),
            None => self.default_chapters_per_series,
        }
    }

    pub fn inter_chapter_delay(&self, source_domain: &str) -> Option<Duration> {
        self.domain_rate_limits
            .get(source_domain)
            .map(|limit| limit.inter_chapter_delay)
            .filter(|d| !d.is_zero())
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_domain_rate_limits(raw: &str) -> HashMap<String, DomainRateLimit> {
    let mut limits = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((domain, rest)) = entry.split_once('=') else {
            tracing::warn!("Ignoring malformed DOMAIN_RATE_LIMITS entry '{}'", entry);
            continue;
        };
        let (max_raw, delay_raw) = rest.split_once(':').unwrap_or((rest, "0"));
        let (Ok(max_chapters), Ok(delay_ms)) = (max_raw.parse::<i64>(), delay_raw.parse::<u64>())
        else {
            tracing::warn!("Ignoring malformed DOMAIN_RATE_LIMITS entry '{}'", entry);
            continue;
        };
        if max_chapters < 1 {
            continue;
        }
        limits.insert(
            domain.trim().to_string(),
            DomainRateLimit {
                max_concurrent_chapters: max_chapters,
                inter_chapter_delay: Duration::from_millis(delay_ms),
            },
        );
    }
    limits
}
