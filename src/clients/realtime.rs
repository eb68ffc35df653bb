use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clients::{ClientError, ClientResult};

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct RealtimeToken {
    pub token: String,
    pub expires_in_seconds: i64,
}

/// Contract with the realtime pub/sub bus. Publishing is best-effort; the
/// event worker is the only caller and swallows failures.
#[async_trait]
pub trait RealtimeBus: Send + Sync {
    async fn publish(&self, channel: &str, event_name: &str, payload: &Value) -> ClientResult<()>;

    /// Mint a short-lived capability token scoped to the given channels
    /// (`*` for administrative clients).
    async fn mint_token(&self, channels: &[String]) -> ClientResult<RealtimeToken>;
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    channel: &'a str,
    event: &'a str,
    payload: &'a Value,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    channels: &'a [String],
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    expires_in: i64,
}

pub struct HttpRealtimeBus {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpRealtimeBus {
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
impl RealtimeBus for HttpRealtimeBus {
    async fn publish(&self, channel: &str, event_name: &str, payload: &Value) -> ClientResult<()> {
        let url = format!("{}/publish", self.base_url);
        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&PublishRequest {
                channel,
                event: event_name,
                payload,
            })
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ClientError::Timeout(url.clone()))??;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16(), url));
        }
        Ok(())
    }

    async fn mint_token(&self, channels: &[String]) -> ClientResult<RealtimeToken> {
        let url = format!("{}/tokens", self.base_url);
        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&TokenRequest { channels })
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ClientError::Timeout(url.clone()))??;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16(), url));
        }

        let parsed: TokenResponse =
            response.json().await.map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(RealtimeToken {
            token: parsed.token,
            expires_in_seconds: parsed.expires_in,
        })
    }
}
