use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Query, Request, State,
    },
    http::{request::Parts, StatusCode},
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::experiments::ExperimentService;
use crate::ingest::{
    validate_short_code, ClickPayload, ConversionAck, ConversionPayload, EventPipeline,
};
use crate::realtime::RealtimeAggregator;
use crate::reporting::ReportingFacade;

pub struct AppState {
    pub pipeline: Arc<EventPipeline>,
    pub reporting: Arc<ReportingFacade>,
    pub experiments: Arc<ExperimentService>,
    pub realtime: Arc<RealtimeAggregator>,
}

/// JSON body whose rejections use the API error shape
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::validation("invalid_request", rejection.body_text())),
        }
    }
}

/// Query string whose rejections use the API error shape
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(query_error(rejection)),
        }
    }
}

fn query_error(rejection: QueryRejection) -> AppError {
    AppError::validation("invalid_request", rejection.body_text())
}

/// Parse an optional numeric query value, mapping junk to `code`
pub fn parse_optional<T: std::str::FromStr>(
    raw: Option<&str>,
    code: &'static str,
    name: &str,
) -> AppResult<Option<T>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::validation(code, format!("{name} must be a number, got '{value}'"))),
    }
}

/// Short code from a path segment. A code that fails validation was never
/// registered, so it reads as unknown rather than malformed.
pub fn path_short_code(raw: &str) -> AppResult<String> {
    validate_short_code(raw).map_err(|_| AppError::NotFound(format!("short code '{raw}'")))
}

/// Numeric test id from a path segment
pub fn path_test_id(raw: &str) -> AppResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::validation("invalid_request", format!("invalid test id '{raw}'")))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
}

pub async fn health_check() -> Json<StatusResponse> {
    Json(StatusResponse { status: "OK" })
}

/// Record a click from the redirect edge
pub async fn record_click(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<ClickPayload>,
) -> AppResult<(StatusCode, Json<StatusResponse>)> {
    state.pipeline.record_click(&payload).await?;
    Ok((StatusCode::ACCEPTED, Json(StatusResponse { status: "recorded" })))
}

/// Record a conversion; attribution is refreshed asynchronously
pub async fn record_conversion(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<ConversionPayload>,
) -> AppResult<(StatusCode, Json<ConversionAck>)> {
    let ack = state.pipeline.record_conversion(&payload).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}
