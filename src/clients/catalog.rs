use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::clients::{ClientError, ClientResult};

#[derive(Debug, Clone)]
pub struct CatalogChapterPage {
    pub chapter_numbers: Vec<f64>,
    pub total_pages: i64,
    pub total_records: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCatalogChapter {
    pub chapter_id: String,
    pub chapter_number: f64,
    pub chapter_title: String,
    pub chapter_images: Vec<String>,
    pub path: String,
    pub thumbnail_image_url: String,
}

/// Contract with the backend catalog, the system of record for published
/// chapters.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_chapters(
        &self,
        external_id: &str,
        page: i64,
        page_size: i64,
    ) -> ClientResult<CatalogChapterPage>;

    async fn create_chapters(
        &self,
        external_id: &str,
        chapters: &[NewCatalogChapter],
    ) -> ClientResult<()>;
}

/// Every chapter number the catalog holds for one series, across all pages.
pub async fn all_chapter_numbers(
    catalog: &dyn CatalogApi,
    external_id: &str,
) -> ClientResult<Vec<f64>> {
    let mut numbers = Vec::new();
    let mut page = 1i64;
    loop {
        let result = catalog.list_chapters(external_id, page, 100).await?;
        numbers.extend(result.chapter_numbers);
        if page >= result.total_pages {
            break;
        }
        page += 1;
    }
    Ok(numbers)
}

#[derive(Deserialize)]
struct ListChaptersResponse {
    retcode: i64,
    #[serde(default)]
    data: Vec<CatalogChapterRow>,
    meta: Option<ListChaptersMeta>,
}

#[derive(Deserialize)]
struct CatalogChapterRow {
    chapter_number: f64,
}

#[derive(Deserialize)]
struct ListChaptersMeta {
    #[serde(default)]
    total_page: i64,
    #[serde(default)]
    total_record: i64,
}

#[derive(Deserialize)]
struct CreateChaptersResponse {
    retcode: i64,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct CreateChaptersRequest<'a> {
    chapters: &'a [NewCatalogChapter],
}

pub struct HttpCatalog {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpCatalog {
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
impl CatalogApi for HttpCatalog {
    async fn list_chapters(
        &self,
        external_id: &str,
        page: i64,
        page_size: i64,
    ) -> ClientResult<CatalogChapterPage> {
        let url = format!(
            "{}/api/series/{}/chapters?page={}&page_size={}&sort_order=asc",
            self.base_url, external_id, page, page_size
        );
        let send = self.client.get(&url).header("x-api-key", &self.api_key).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ClientError::Timeout(url.clone()))??;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16(), url.clone()));
        }

        let parsed: ListChaptersResponse =
            response.json().await.map_err(|e| ClientError::Decode(e.to_string()))?;
        if parsed.retcode != 0 {
            return Err(ClientError::Unavailable(format!(
                "catalog retcode {} listing chapters for {}",
                parsed.retcode, external_id
            )));
        }

        let meta = parsed.meta.unwrap_or(ListChaptersMeta {
            total_page: 1,
            total_record: parsed.data.len() as i64,
        });
        Ok(CatalogChapterPage {
            chapter_numbers: parsed.data.into_iter().map(|c| c.chapter_number).collect(),
            total_pages: meta.total_page.max(1),
            total_records: meta.total_record,
        })
    }

    async fn create_chapters(
        &self,
        external_id: &str,
        chapters: &[NewCatalogChapter],
    ) -> ClientResult<()> {
        let url = format!("{}/api/series/{}/chapters", self.base_url, external_id);
        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&CreateChaptersRequest { chapters })
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ClientError::Timeout(url.clone()))??;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16(), url));
        }

        let parsed: CreateChaptersResponse =
            response.json().await.map_err(|e| ClientError::Decode(e.to_string()))?;
        if parsed.retcode != 0 {
            return Err(ClientError::Unavailable(format!(
                "catalog retcode {}: {}",
                parsed.retcode,
                parsed.message.unwrap_or_default()
            )));
        }
        Ok(())
    }
}
