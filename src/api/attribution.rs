//! Attribution report handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::attribution::{AttributionModel, AttributionReport};
use crate::error::AppResult;

use super::handlers::{parse_optional, path_short_code, ApiQuery, AppState};

#[derive(Debug, Deserialize)]
pub struct AttributionQueryParams {
    /// One of first_touch, last_touch, linear, time_decay, position_based, data_driven
    pub model: Option<String>,

    /// Report window in days (1..=365)
    pub days: Option<String>,
}

/// Get the attribution report of a short code
pub async fn get_attribution_report(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
    ApiQuery(params): ApiQuery<AttributionQueryParams>,
) -> AppResult<Json<AttributionReport>> {
    let short_code = path_short_code(&short_code)?;

    let model = match params.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(raw) => raw.parse::<AttributionModel>()?,
        None => state.reporting.default_model(),
    };
    let days = parse_optional::<u32>(params.days.as_deref(), "invalid_days_parameter", "days")?
        .unwrap_or_else(|| state.reporting.default_days());

    let report = state
        .reporting
        .attribution_report(&short_code, model, days)
        .await?;
    Ok(Json(report))
}
