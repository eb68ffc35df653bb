use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::db::{RegistryError, UrlRewrite};
use crate::events::EventType;
use crate::models::{
    CreateSeries, Paginated, Series, SeriesFilter, SeriesWithSources, SyncTask, UpdateSeries,
};
use crate::state::AppState;
use crate::utils::response::{ApiError, ApiResponse};

const MAX_BULK_ITEMS: usize = 50;
const MAX_MIGRATION_SCOPE: usize = 200;

#[utoipa::path(
    post,
    path = "/series",
    request_body = CreateSeries,
    responses(
        (status = 201, description = "Series registered; first scan is scheduled immediately"),
        (status = 400, description = "Invalid source URLs"),
        (status = 409, description = "External id already registered")
    ),
    security(("api_key" = []))
)]
pub async fn create_series(
    State(state): State<AppState>,
    Json(payload): Json<CreateSeries>,
) -> Result<(StatusCode, Json<ApiResponse<SeriesWithSources>>), ApiError> {
    let created = state.registry.create_series(&payload).await?;
    state.events.emit(
        EventType::SeriesCreated,
        &created.series.external_id,
        json!({ "id": created.series.id, "title": created.series.title }),
    );
    tracing::info!(
        "Registered series '{}' ({})",
        created.series.title,
        created.series.external_id
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[derive(Deserialize, ToSchema)]
pub struct BulkCreate {
    pub items: Vec<CreateSeries>,
}

#[derive(Serialize, ToSchema)]
pub struct BulkCreateItem {
    pub external_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[utoipa::path(
    post,
    path = "/series/bulk",
    request_body = BulkCreate,
    responses(
        (status = 201, description = "Per-item created/skipped outcome; duplicates never conflict")
    ),
    security(("api_key" = []))
)]
pub async fn bulk_create(
    State(state): State<AppState>,
    Json(payload): Json<BulkCreate>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<BulkCreateItem>>>), ApiError> {
    if payload.items.len() > MAX_BULK_ITEMS {
        return Err(ApiError::BadRequest(format!(
            "at most {} items per bulk request",
            MAX_BULK_ITEMS
        )));
    }

    let mut results = Vec::with_capacity(payload.items.len());
    for item in &payload.items {
        let external_id = item.external_id.clone();
        match state.registry.create_series(item).await {
            Ok(created) => {
                state.events.emit(
                    EventType::SeriesCreated,
                    &created.series.external_id,
                    json!({ "id": created.series.id, "title": created.series.title }),
                );
                results.push(BulkCreateItem {
                    external_id,
                    status: "created",
                    error: None,
                });
            }
            Err(RegistryError::AlreadyRegistered(_)) => results.push(BulkCreateItem {
                external_id,
                status: "skipped",
                error: None,
            }),
            Err(e @ RegistryError::InvalidSource(_)) => results.push(BulkCreateItem {
                external_id,
                status: "skipped",
                error: Some(e.to_string()),
            }),
            Err(e) => return Err(e.into()),
        }
    }

    Ok((StatusCode::CREATED, Json(ApiResponse::success(results))))
}

#[utoipa::path(
    get,
    path = "/series",
    responses(
        (status = 200, description = "Paginated series list, filterable by status and title substring")
    ),
    security(("api_key" = []))
)]
pub async fn list_series(
    State(state): State<AppState>,
    Query(filter): Query<SeriesFilter>,
) -> Result<Json<ApiResponse<Paginated<Series>>>, ApiError> {
    let page = state.registry.list_series(&filter).await?;
    Ok(Json(ApiResponse::success(page)))
}

#[derive(Serialize, ToSchema)]
pub struct SeriesDetail {
    #[serde(flatten)]
    pub series: SeriesWithSources,
    pub failed_tasks: Vec<SyncTask>,
}

#[utoipa::path(
    get,
    path = "/series/{id}",
    responses(
        (status = 200, description = "Series with sources and its failed tasks"),
        (status = 404, description = "Unknown series")
    ),
    security(("api_key" = []))
)]
pub async fn get_series(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<SeriesDetail>>, ApiError> {
    let series = state
        .registry
        .get_series(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Series not found".into()))?;
    let sources = state.registry.sources_for_series(id).await?;
    let failed_tasks = state.registry.failed_tasks(id).await?;

    Ok(Json(ApiResponse::success(SeriesDetail {
        series: SeriesWithSources { series, sources },
        failed_tasks,
    })))
}

#[utoipa::path(
    put,
    path = "/series/{id}",
    request_body = UpdateSeries,
    responses(
        (status = 200, description = "Updated series"),
        (status = 404, description = "Unknown series")
    ),
    security(("api_key" = []))
)]
pub async fn update_series(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<UpdateSeries>,
) -> Result<Json<ApiResponse<SeriesWithSources>>, ApiError> {
    let updated = state.registry.update_series(id, &patch).await?;
    state.events.emit(
        EventType::SeriesUpdated,
        &updated.series.external_id,
        json!({ "id": updated.series.id }),
    );
    Ok(Json(ApiResponse::success(updated)))
}

#[utoipa::path(
    delete,
    path = "/series/{id}",
    responses(
        (status = 200, description = "Series deleted, cascading to sources and tasks"),
        (status = 404, description = "Unknown series")
    ),
    security(("api_key" = []))
)]
pub async fn delete_series(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let series = state
        .registry
        .get_series(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Series not found".into()))?;
    if !state.registry.delete_series(id).await? {
        return Err(ApiError::NotFound("Series not found".into()));
    }

    state
        .events
        .emit(EventType::SeriesDeleted, &series.external_id, json!({ "id": id }));
    tracing::info!("Deleted series '{}' ({})", series.title, series.external_id);
    Ok(Json(ApiResponse::message("Series deleted")))
}

#[utoipa::path(
    post,
    path = "/series/{id}/force-scan",
    responses(
        (status = 200, description = "Next scan moved to now; a busy series keeps its status"),
        (status = 404, description = "Unknown series")
    ),
    security(("api_key" = []))
)]
pub async fn force_scan(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    if !state.registry.trigger_force_scan(id).await? {
        return Err(ApiError::NotFound("Series not found".into()));
    }
    Ok(Json(ApiResponse::message("Scan scheduled")))
}

#[derive(Serialize, ToSchema)]
pub struct RetryOutcome {
    pub retried_count: u64,
}

#[utoipa::path(
    post,
    path = "/series/{id}/retry",
    responses(
        (status = 200, description = "Failed tasks requeued and series put back to syncing"),
        (status = 400, description = "No failed tasks"),
        (status = 404, description = "Unknown series")
    ),
    security(("api_key" = []))
)]
pub async fn retry_failed(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<RetryOutcome>>, ApiError> {
    state
        .registry
        .get_series(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Series not found".into()))?;

    let retried_count = state.registry.retry_failed(id).await?;
    if retried_count == 0 {
        return Err(ApiError::BadRequest("No failed tasks to retry".into()));
    }
    Ok(Json(ApiResponse::success(RetryOutcome { retried_count })))
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateDomain {
    pub old_domain: String,
    pub new_domain: String,
    pub series_ids: Option<Vec<i64>>,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

#[derive(Serialize, ToSchema)]
#[serde(untagged)]
pub enum DomainMigrationOutcome {
    Preview {
        affected_count: i64,
        sample: Vec<UrlRewrite>,
    },
    Applied {
        updated_count: u64,
    },
}

#[utoipa::path(
    post,
    path = "/series/update-domain",
    request_body = UpdateDomain,
    responses(
        (status = 200, description = "Hostname-only rewrite of matching source URLs; dry runs preview")
    ),
    security(("api_key" = []))
)]
pub async fn update_domain(
    State(state): State<AppState>,
    Json(payload): Json<UpdateDomain>,
) -> Result<Json<ApiResponse<DomainMigrationOutcome>>, ApiError> {
    if payload.old_domain.trim().is_empty() || payload.new_domain.trim().is_empty() {
        return Err(ApiError::BadRequest("old_domain and new_domain are required".into()));
    }
    if let Some(ids) = &payload.series_ids {
        if ids.len() > MAX_MIGRATION_SCOPE {
            return Err(ApiError::BadRequest(format!(
                "at most {} series ids per migration",
                MAX_MIGRATION_SCOPE
            )));
        }
    }
    let scope = payload.series_ids.as_deref();

    let outcome = if payload.dry_run {
        let preview = state
            .registry
            .preview_domain_migration(&payload.old_domain, &payload.new_domain, scope)
            .await?;
        DomainMigrationOutcome::Preview {
            affected_count: preview.affected_count,
            sample: preview.sample,
        }
    } else {
        let updated_count = state
            .registry
            .apply_domain_migration(&payload.old_domain, &payload.new_domain, scope)
            .await?;
        tracing::info!(
            "Migrated {} source(s) from {} to {}",
            updated_count,
            payload.old_domain,
            payload.new_domain
        );
        DomainMigrationOutcome::Applied { updated_count }
    };

    Ok(Json(ApiResponse::success(outcome)))
}
