use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::attribution::get_attribution_report;
use super::experiments::{
    assign_variant, create_test, get_sequential, get_significance, get_test, list_tests,
    record_test_conversion, start_test, stop_test,
};
use super::handlers::{health_check, record_click, record_conversion, AppState};
use super::realtime::{get_snapshot, realtime_ws};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let ingest_routes = Router::new()
        .route("/events/click", post(record_click))
        .route("/attribution/conversion", post(record_conversion))
        .route("/attribution/{short_code}", get(get_attribution_report));

    let realtime_routes = Router::new()
        .route("/realtime/{short_code}", get(get_snapshot))
        .route("/realtime/{short_code}/ws", get(realtime_ws));

    let experiment_routes = Router::new()
        .route("/ab-test", post(create_test))
        .route("/ab-tests", get(list_tests))
        .route("/ab-test/{id}", get(get_test))
        .route("/ab-test/{id}/start", post(start_test))
        .route("/ab-test/{id}/stop", post(stop_test))
        .route("/ab-test/{id}/assign", post(assign_variant))
        .route("/ab-test/{id}/convert", post(record_test_conversion))
        .route("/ab-test/{id}/significance", get(get_significance))
        .route("/ab-test/{id}/sequential", get(get_sequential));

    Router::new()
        .route("/health", get(health_check))
        .merge(ingest_routes)
        .merge(realtime_routes)
        .merge(experiment_routes)
        .layer(cors)
        .with_state(state)
}
