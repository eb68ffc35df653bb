use reqwest::Client;
use std::time::Duration;

pub fn create_client() -> Client {
    Client::builder()
        .user_agent("manga-mirror/0.1")
        .timeout(Duration::from_secs(120))
        .build()
        .expect("Failed to create HTTP client")
}
