pub mod series;
pub mod sources;
pub mod tasks;

use anyhow::Result;
use chrono::NaiveDateTime;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use sources::{DomainMigrationPreview, UrlRewrite};
pub use tasks::RecoveryReport;

pub async fn init_db(db_url: &str) -> Result<SqlitePool> {
    let db_path = db_url.trim_start_matches("sqlite:");
    if let Some(parent) = Path::new(db_path).parent() {
        fs::create_dir_all(parent)?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::from_str(db_url)?
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Single writer of durable state. Cheap to clone; every component holds one.
#[derive(Clone)]
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Timestamps are always bound from here so that stored values and
/// comparison operands share one format.
pub(crate) fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

#[derive(Debug)]
pub enum RegistryError {
    AlreadyRegistered(String),
    InvalidSource(String),
    NotFound,
    Database(sqlx::Error),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyRegistered(id) => {
                write!(f, "series already registered for external id {}", id)
            }
            RegistryError::InvalidSource(msg) => write!(f, "invalid source: {}", msg),
            RegistryError::NotFound => write!(f, "not found"),
            RegistryError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        RegistryError::Database(e)
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
