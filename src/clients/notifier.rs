use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::clients::{ClientError, ClientResult};
use crate::models::Series;

/// Contract with the external notification channel.
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify(&self, title: &str, external_id: &str, error: &str) -> ClientResult<()>;
}

#[derive(Serialize)]
struct WebhookPayload {
    content: String,
}

pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(client: Client, webhook_url: String, timeout: Duration) -> Self {
        Self {
            client,
            webhook_url,
            timeout,
        }
    }
}

#[async_trait]
impl FailureNotifier for WebhookNotifier {
    async fn notify(&self, title: &str, external_id: &str, error: &str) -> ClientResult<()> {
        let payload = WebhookPayload {
            content: format!("Sync failing for '{}' ({}): {}", title, external_id, error),
        };
        let send = self.client.post(&self.webhook_url).json(&payload).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ClientError::Timeout(self.webhook_url.clone()))??;
        if !response.status().is_success() {
            return Err(ClientError::Status(
                response.status().as_u16(),
                self.webhook_url.clone(),
            ));
        }
        Ok(())
    }
}

/// Rate-limited front for the notifier: fires only once a series has failed
/// `after_failures` times in a row, and at most once per cooldown per
/// series. Notification errors never propagate.
pub struct NotificationGate {
    notifier: Option<Arc<dyn FailureNotifier>>,
    after_failures: i64,
    cooldown: Duration,
    last_sent: Mutex<HashMap<i64, Instant>>,
}

impl NotificationGate {
    pub fn new(
        notifier: Option<Arc<dyn FailureNotifier>>,
        after_failures: i64,
        cooldown: Duration,
    ) -> Self {
        Self {
            notifier,
            after_failures,
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub async fn series_failed(&self, series: &Series, error: &str) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if series.consecutive_failures < self.after_failures {
            return;
        }

        {
            let mut last_sent = self.last_sent.lock().await;
            if let Some(sent) = last_sent.get(&series.id) {
                if sent.elapsed() < self.cooldown {
                    return;
                }
            }
            last_sent.insert(series.id, Instant::now());
        }

        if let Err(e) = notifier
            .notify(&series.title, &series.external_id, error)
            .await
        {
            tracing::warn!("Failure notification for series {} not sent: {}", series.id, e);
        }
    }
}
