//! A/B test handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::AppResult;
use crate::experiments::{
    AbTest, Assignment, ConfidenceLevel, CreateAbTestRequest, ExperimentConversion,
    SequentialReport, SignificanceReport, StopTestRequest, TestPage,
};
use crate::reporting::ExperimentStatus;

use super::handlers::{parse_optional, path_test_id, ApiJson, ApiQuery, AppState, SessionRequest};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Page size (default: 20, max: 100)
    pub limit: Option<String>,
    /// Opaque cursor from the previous page
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    /// 90, 95 or 99
    pub confidence: Option<String>,
    /// Restrict the analysis to one challenger
    pub variant_id: Option<String>,
}

impl AnalysisQuery {
    fn confidence(&self, state: &AppState) -> AppResult<ConfidenceLevel> {
        match self.confidence.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(raw) => raw.parse(),
            None => Ok(state.experiments.default_confidence()),
        }
    }

    fn variant_id(&self) -> AppResult<Option<i64>> {
        parse_optional(self.variant_id.as_deref(), "invalid_request", "variant_id")
    }
}

/// Create a test; `start_immediately` decides between draft and active
pub async fn create_test(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<CreateAbTestRequest>,
) -> AppResult<(StatusCode, Json<AbTest>)> {
    let test = state.experiments.create(payload).await?;
    Ok((StatusCode::CREATED, Json(test)))
}

pub async fn list_tests(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<ListQuery>,
) -> AppResult<Json<TestPage>> {
    let limit = parse_optional(params.limit.as_deref(), "invalid_request", "limit")?;
    let page = state
        .experiments
        .list(limit, params.cursor.as_deref().filter(|c| !c.is_empty()))
        .await?;
    Ok(Json(page))
}

/// Test state with variant statistics and both analyses
pub async fn get_test(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<AnalysisQuery>,
) -> AppResult<Json<ExperimentStatus>> {
    let test_id = path_test_id(&id)?;
    let level = params.confidence(&state)?;
    let status = state.reporting.experiment_status(test_id, level).await?;
    Ok(Json(status))
}

pub async fn start_test(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<AbTest>> {
    let test_id = path_test_id(&id)?;
    Ok(Json(state.experiments.start(test_id).await?))
}

pub async fn stop_test(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<StopTestRequest>,
) -> AppResult<Json<AbTest>> {
    let test_id = path_test_id(&id)?;
    Ok(Json(state.experiments.stop(test_id, payload).await?))
}

pub async fn assign_variant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<SessionRequest>,
) -> AppResult<Json<Assignment>> {
    let test_id = path_test_id(&id)?;
    let assignment = state
        .experiments
        .assign(test_id, &payload.session_id)
        .await?;
    Ok(Json(assignment))
}

pub async fn record_test_conversion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<SessionRequest>,
) -> AppResult<Json<ExperimentConversion>> {
    let test_id = path_test_id(&id)?;
    let conversion = state
        .experiments
        .convert(test_id, &payload.session_id)
        .await?;
    Ok(Json(conversion))
}

pub async fn get_significance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<AnalysisQuery>,
) -> AppResult<Json<SignificanceReport>> {
    let test_id = path_test_id(&id)?;
    let level = params.confidence(&state)?;
    let report = state
        .experiments
        .significance(test_id, level, params.variant_id()?)
        .await?;
    Ok(Json(report))
}

pub async fn get_sequential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<AnalysisQuery>,
) -> AppResult<Json<SequentialReport>> {
    let test_id = path_test_id(&id)?;
    let report = state
        .experiments
        .sequential(test_id, params.variant_id()?)
        .await?;
    Ok(Json(report))
}
