pub mod events;
pub mod health;
pub mod series;

use std::sync::Arc;

use axum::{
    http::Method,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{middleware::auth_middleware, ApiKeyGuard};
use crate::state::AppState;

/// Full admin surface. Everything except the liveness endpoint sits behind
/// the shared-secret middleware.
pub fn router(state: AppState, guard: Arc<ApiKeyGuard>) -> Router {
    let authed = Router::new()
        .route(
            "/series",
            get(series::list_series).post(series::create_series),
        )
        .route("/series/bulk", post(series::bulk_create))
        .route("/series/update-domain", post(series::update_domain))
        .route(
            "/series/{id}",
            get(series::get_series)
                .put(series::update_series)
                .patch(series::update_series)
                .delete(series::delete_series),
        )
        .route("/series/{id}/force-scan", post(series::force_scan))
        .route("/series/{id}/retry", post(series::retry_failed))
        .route("/events/token", post(events::mint_token))
        .layer(middleware::from_fn_with_state(guard, auth_middleware));

    Router::new()
        .route("/health", get(health::health))
        .merge(authed)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                ])
                .allow_headers(Any),
        )
        .with_state(state)
}
