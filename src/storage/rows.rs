//! Row shapes shared by the SQL backends

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::experiments::{AbTest, Variant};
use crate::models::{ClickEvent, ConversionEvent};

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp {ms} is out of range"))
}

#[derive(Debug, FromRow)]
pub struct ClickRow {
    pub session_id: String,
    pub short_code: String,
    pub occurred_at: i64,
    pub source: String,
    pub medium: String,
    pub campaign: Option<String>,
    pub country: String,
    pub device: String,
}

impl TryFrom<ClickRow> for ClickEvent {
    type Error = anyhow::Error;

    fn try_from(row: ClickRow) -> Result<Self> {
        Ok(ClickEvent {
            session_id: row.session_id,
            short_code: row.short_code,
            timestamp: from_millis(row.occurred_at)?,
            source: row.source,
            medium: row.medium,
            campaign: row.campaign,
            country: row.country,
            device: row.device,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ConversionRow {
    pub session_id: String,
    pub short_code: String,
    pub goal_id: String,
    pub value: f64,
    pub occurred_at: i64,
}

impl TryFrom<ConversionRow> for ConversionEvent {
    type Error = anyhow::Error;

    fn try_from(row: ConversionRow) -> Result<Self> {
        Ok(ConversionEvent {
            session_id: row.session_id,
            short_code: row.short_code,
            goal_id: row.goal_id,
            value: row.value,
            timestamp: from_millis(row.occurred_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct TestRow {
    pub id: i64,
    pub name: String,
    pub metric_name: String,
    pub state: String,
    pub start_date: i64,
    pub end_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub stop_reason: Option<String>,
    pub winner_variant_id: Option<i64>,
}

impl TestRow {
    pub fn into_test(self, variants: Vec<Variant>) -> Result<AbTest> {
        Ok(AbTest {
            id: self.id,
            name: self.name,
            metric_name: self.metric_name,
            state: self.state.parse()?,
            start_date: from_millis(self.start_date)?,
            end_date: self.end_date.map(from_millis).transpose()?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            stop_reason: self.stop_reason,
            winner_variant_id: self.winner_variant_id,
            variants,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct VariantRow {
    pub id: i64,
    pub test_id: i64,
    pub name: String,
    pub short_code: String,
    pub is_control: bool,
    pub traffic_split: f64,
    pub sessions: i64,
    pub conversions: i64,
}

impl From<VariantRow> for Variant {
    fn from(row: VariantRow) -> Self {
        Variant {
            id: row.id,
            test_id: row.test_id,
            name: row.name,
            short_code: row.short_code,
            is_control: row.is_control,
            traffic_split: row.traffic_split,
            sessions: row.sessions.max(0) as u64,
            conversions: row.conversions.max(0) as u64,
        }
    }
}

pub fn collect_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}
