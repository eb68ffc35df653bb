use std::sync::Arc;
use std::time::Instant;

use crate::clients::RealtimeBus;
use crate::config::Config;
use crate::db::Registry;
use crate::events::EventPublisher;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub config: Arc<Config>,
    pub events: EventPublisher,
    pub realtime: Option<Arc<dyn RealtimeBus>>,
    pub started_at: Instant,
}
