pub mod catalog;
pub mod http;
pub mod notifier;
pub mod purge;
pub mod realtime;
pub mod scraper;
pub mod uploader;

use std::fmt;

pub use catalog::{CatalogApi, CatalogChapterPage, HttpCatalog, NewCatalogChapter};
pub use http::create_client;
pub use notifier::{FailureNotifier, NotificationGate, WebhookNotifier};
pub use purge::{CachePurger, HttpCachePurger, Invalidator};
pub use realtime::{HttpRealtimeBus, RealtimeBus, RealtimeToken};
pub use scraper::{
    ChapterImage, ChapterItem, HttpScraper, SourceMetadata, SourceScraper, StageImage,
    StageRequest, StagedChapter,
};
pub use uploader::{ChapterUploader, HttpUploader, UploadRequest, UploadedChapter};

/// Failures talking to an external collaborator. At the task level every
/// variant collapses into one error string; the distinction exists for logs.
#[derive(Debug)]
pub enum ClientError {
    Http(String),
    Timeout(String),
    Status(u16, String),
    Decode(String),
    Unavailable(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Http(msg) => write!(f, "HTTP error: {}", msg),
            ClientError::Timeout(what) => write!(f, "timeout: {}", what),
            ClientError::Status(code, what) => write!(f, "unexpected status {} from {}", code, what),
            ClientError::Decode(msg) => write!(f, "decode error: {}", msg),
            ClientError::Unavailable(msg) => write!(f, "unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout(e.to_string())
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Http(e.to_string())
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
