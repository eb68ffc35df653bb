use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::clients::{ClientError, ClientResult};

#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub zip_url: String,
    pub series_external_id: String,
    pub chapter_number: f64,
}

#[derive(Debug, Clone)]
pub struct UploadedChapter {
    pub chapter_id: String,
    pub images: Vec<String>,
    pub path: String,
}

/// Contract with the storage uploader. Idempotent per
/// (series, chapter_number): repeats replace rather than duplicate.
#[async_trait]
pub trait ChapterUploader: Send + Sync {
    async fn upload_single(&self, request: &UploadRequest) -> ClientResult<UploadedChapter>;
}

#[derive(Deserialize)]
struct UploadResponse {
    results: UploadResults,
}

#[derive(Deserialize)]
struct UploadResults {
    chapter_id: String,
    #[serde(default)]
    data: Vec<String>,
    #[serde(default)]
    path: String,
}

pub struct HttpUploader {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpUploader {
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
impl ChapterUploader for HttpUploader {
    async fn upload_single(&self, request: &UploadRequest) -> ClientResult<UploadedChapter> {
        let url = format!("{}/upload/single", self.base_url);
        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(request)
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ClientError::Timeout(url.clone()))??;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16(), url));
        }

        let parsed: UploadResponse = response.json().await.map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(UploadedChapter {
            chapter_id: parsed.results.chapter_id,
            images: parsed.results.data,
            path: parsed.results.path,
        })
    }
}
