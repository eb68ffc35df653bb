use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use crate::handlers;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "manga-mirror API",
        description = "Admin surface of the catalog auto-synchronization service.",
        version = "1.0.0"
    ),
    paths(
        handlers::series::create_series,
        handlers::series::bulk_create,
        handlers::series::list_series,
        handlers::series::get_series,
        handlers::series::update_series,
        handlers::series::delete_series,
        handlers::series::force_scan,
        handlers::series::retry_failed,
        handlers::series::update_domain,
        handlers::events::mint_token,
        handlers::health::health,
    ),
    components(
        schemas(
            models::Series,
            models::SeriesStatus,
            models::SeriesSource,
            models::SourceScanStatus,
            models::SyncTask,
            models::TaskStatus,
            models::CreateSeries,
            models::UpdateSeries,
            handlers::series::BulkCreate,
            handlers::series::BulkCreateItem,
            handlers::series::RetryOutcome,
            handlers::series::UpdateDomain,
            handlers::health::Health,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-api-key"))),
            );
        }
    }
}
