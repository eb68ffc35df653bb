use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clients::{ClientError, ClientResult};

const QUEUE_CAPACITY: usize = 1024;
const COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Tag-based purge against the external cache. Tags are opaque here; the
/// mapping to concrete cache keys lives in the purge service.
#[async_trait]
pub trait CachePurger: Send + Sync {
    async fn purge(&self, tags: &[String]) -> ClientResult<()>;
}

#[derive(Serialize)]
struct PurgeRequest<'a> {
    tags: &'a [String],
}

pub struct HttpCachePurger {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpCachePurger {
    pub fn new(client: Client, base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl CachePurger for HttpCachePurger {
    async fn purge(&self, tags: &[String]) -> ClientResult<()> {
        let url = format!("{}/purge", self.base_url);
        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&PurgeRequest { tags })
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ClientError::Timeout(url.clone()))??;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16(), url));
        }
        Ok(())
    }
}

/// Debounced invalidation queue. Tags scheduled within one coalescing window
/// collapse into a single purge call; overflow drops tags rather than
/// stalling a sync tick.
#[derive(Clone)]
pub struct Invalidator {
    tx: mpsc::Sender<String>,
}

impl Invalidator {
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    pub fn schedule(&self, tag: String) {
        if self.tx.try_send(tag).is_err() {
            tracing::debug!("Invalidation queue full, dropping tag");
        }
    }
}

pub fn spawn_purge_worker(
    mut rx: mpsc::Receiver<String>,
    purger: Arc<dyn CachePurger>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            let mut tags = HashSet::new();
            tags.insert(first);
            tokio::time::sleep(COALESCE_WINDOW).await;
            while let Ok(tag) = rx.try_recv() {
                tags.insert(tag);
            }

            let tags: Vec<String> = tags.into_iter().collect();
            if let Err(e) = purger.purge(&tags).await {
                tracing::warn!("Cache purge failed for {} tag(s): {}", tags.len(), e);
            } else {
                tracing::debug!("Purged {} cache tag(s)", tags.len());
            }
        }
    })
}
