use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clients::RealtimeBus;
use crate::db::now;

pub const EVENT_VERSION: i64 = 1;

/// Channel every event lands on in addition to its per-series channel.
pub const GLOBAL_CHANNEL: &str = "list";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    SeriesCreated,
    SeriesUpdated,
    SeriesDeleted,
    ScanStarted,
    ScanFinished,
    SyncProgress,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SeriesCreated => "manga.created",
            EventType::SeriesUpdated => "manga.updated",
            EventType::SeriesDeleted => "manga.deleted",
            EventType::ScanStarted => "manga.scan.started",
            EventType::ScanFinished => "manga.scan.finished",
            EventType::SyncProgress => "manga.sync.progress",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub series_external_id: String,
    pub data: Value,
    pub event_version: i64,
    pub timestamp: String,
}

/// Fire-and-forget emission into a bounded queue. Nothing on the API or
/// pipeline path ever awaits the bus; overflow drops the event.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<Event>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn emit(&self, event_type: EventType, series_external_id: &str, data: Value) {
        let event = Event {
            event_type: event_type.as_str().to_string(),
            series_external_id: series_external_id.to_string(),
            data,
            event_version: EVENT_VERSION,
            timestamp: now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        };
        if self.tx.try_send(event).is_err() {
            tracing::debug!("Event queue full, dropping {}", event_type.as_str());
        }
    }
}

pub fn spawn_event_worker(
    mut rx: mpsc::Receiver<Event>,
    bus: Arc<dyn RealtimeBus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_value(&event) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Unserializable event {}: {}", event.event_type, e);
                    continue;
                }
            };

            let series_channel = format!("series:{}", event.series_external_id);
            for channel in [GLOBAL_CHANNEL, series_channel.as_str()] {
                if let Err(e) = bus.publish(channel, &event.event_type, &payload).await {
                    tracing::warn!(
                        "Publish of {} to '{}' failed: {}",
                        event.event_type,
                        channel,
                        e
                    );
                }
            }
        }
    })
}
