use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use crate::attribution::AttributionReport;
use crate::experiments::{AbTest, NewAbTest, Variant};
use crate::models::{ClickEvent, ConversionEvent};
use crate::storage::rows::{
    collect_rows, to_millis, ClickRow, ConversionRow, TestRow, VariantRow,
};
use crate::storage::{EventStore, StateChange, TestPageKey};

const CLICK_COLUMNS: &str =
    "session_id, short_code, occurred_at, source, medium, campaign, country, device";
const TEST_COLUMNS: &str = "id, name, metric_name, state, start_date, end_date, created_at, updated_at, stop_reason, winner_variant_id";

pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn variants_for(&self, test_id: i64) -> Result<Vec<Variant>> {
        let rows = sqlx::query_as::<_, VariantRow>(
            r#"
            SELECT id, test_id, name, short_code, is_control, traffic_split, sessions, conversions
            FROM ab_variants
            WHERE test_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(test_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(Variant::from).collect())
    }

    async fn hydrate(&self, row: TestRow) -> Result<AbTest> {
        let variants = self.variants_for(row.id).await?;
        row.into_test(variants)
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                short_code TEXT PRIMARY KEY,
                first_seen_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT NOT NULL,
                short_code TEXT NOT NULL,
                occurred_at BIGINT NOT NULL,
                source TEXT NOT NULL,
                medium TEXT NOT NULL,
                campaign TEXT,
                country TEXT NOT NULL,
                device TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_session ON click_events(session_id, occurred_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_code ON click_events(short_code, occurred_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversion_events (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT NOT NULL,
                short_code TEXT NOT NULL,
                goal_id TEXT NOT NULL,
                value DOUBLE PRECISION NOT NULL,
                occurred_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversions_code ON conversion_events(short_code, occurred_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attribution_reports (
                short_code TEXT NOT NULL,
                model TEXT NOT NULL,
                days BIGINT NOT NULL,
                generated_at BIGINT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (short_code, model, days)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ab_tests (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                state TEXT NOT NULL,
                start_date BIGINT NOT NULL,
                end_date BIGINT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                stop_reason TEXT,
                winner_variant_id BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ab_variants (
                id BIGSERIAL PRIMARY KEY,
                test_id BIGINT NOT NULL REFERENCES ab_tests(id),
                position BIGINT NOT NULL,
                name TEXT NOT NULL,
                short_code TEXT NOT NULL,
                is_control BOOLEAN NOT NULL,
                traffic_split DOUBLE PRECISION NOT NULL,
                sessions BIGINT NOT NULL DEFAULT 0,
                conversions BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_variants_test ON ab_variants(test_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_variants_short_code ON ab_variants(short_code)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ab_exposures (
                test_id BIGINT NOT NULL,
                session_id TEXT NOT NULL,
                variant_id BIGINT NOT NULL,
                exposed_at BIGINT NOT NULL,
                converted_at BIGINT,
                PRIMARY KEY (test_id, session_id)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn save_click(&self, event: &ClickEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO links (short_code, first_seen_at)
            VALUES ($1, $2)
            ON CONFLICT (short_code) DO NOTHING
            "#,
        )
        .bind(&event.short_code)
        .bind(to_millis(event.timestamp))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO click_events (session_id, short_code, occurred_at, source, medium, campaign, country, device)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&event.session_id)
        .bind(&event.short_code)
        .bind(to_millis(event.timestamp))
        .bind(&event.source)
        .bind(&event.medium)
        .bind(&event.campaign)
        .bind(&event.country)
        .bind(&event.device)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_conversion(&self, event: &ConversionEvent) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO links (short_code, first_seen_at)
            VALUES ($1, $2)
            ON CONFLICT (short_code) DO NOTHING
            "#,
        )
        .bind(&event.short_code)
        .bind(to_millis(event.timestamp))
        .execute(&mut *tx)
        .await?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO conversion_events (session_id, short_code, goal_id, value, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&event.session_id)
        .bind(&event.short_code)
        .bind(&event.goal_id)
        .bind(event.value)
        .bind(to_millis(event.timestamp))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn link_exists(&self, short_code: &str) -> Result<bool> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM links WHERE short_code = $1")
                .bind(short_code)
                .fetch_one(self.pool.as_ref())
                .await?;

        Ok(count > 0)
    }

    async fn query_touchpoints(
        &self,
        session_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClickEvent>> {
        let rows = sqlx::query_as::<_, ClickRow>(&format!(
            r#"
            SELECT {CLICK_COLUMNS}
            FROM click_events
            WHERE session_id = $1 AND occurred_at BETWEEN $2 AND $3
            ORDER BY occurred_at ASC, id ASC
            "#
        ))
        .bind(session_id)
        .bind(to_millis(from))
        .bind(to_millis(to))
        .fetch_all(self.pool.as_ref())
        .await?;

        collect_rows(rows)
    }

    async fn query_clicks(
        &self,
        short_code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClickEvent>> {
        let rows = sqlx::query_as::<_, ClickRow>(&format!(
            r#"
            SELECT {CLICK_COLUMNS}
            FROM click_events
            WHERE short_code = $1 AND occurred_at BETWEEN $2 AND $3
            ORDER BY occurred_at ASC, id ASC
            "#
        ))
        .bind(short_code)
        .bind(to_millis(from))
        .bind(to_millis(to))
        .fetch_all(self.pool.as_ref())
        .await?;

        collect_rows(rows)
    }

    async fn query_recent_clicks(&self, from: DateTime<Utc>) -> Result<Vec<ClickEvent>> {
        let rows = sqlx::query_as::<_, ClickRow>(&format!(
            r#"
            SELECT {CLICK_COLUMNS}
            FROM click_events
            WHERE occurred_at >= $1
            ORDER BY occurred_at ASC, id ASC
            "#
        ))
        .bind(to_millis(from))
        .fetch_all(self.pool.as_ref())
        .await?;

        collect_rows(rows)
    }

    async fn query_conversions(
        &self,
        short_code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ConversionEvent>> {
        let rows = sqlx::query_as::<_, ConversionRow>(
            r#"
            SELECT session_id, short_code, goal_id, value, occurred_at
            FROM conversion_events
            WHERE short_code = $1 AND occurred_at BETWEEN $2 AND $3
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(short_code)
        .bind(to_millis(from))
        .bind(to_millis(to))
        .fetch_all(self.pool.as_ref())
        .await?;

        collect_rows(rows)
    }

    async fn save_report(&self, report: &AttributionReport) -> Result<()> {
        let payload = serde_json::to_string(report).context("failed to encode report")?;

        sqlx::query(
            r#"
            INSERT INTO attribution_reports (short_code, model, days, generated_at, payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (short_code, model, days) DO UPDATE SET
                generated_at = EXCLUDED.generated_at,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(&report.short_code)
        .bind(report.model.as_str())
        .bind(i64::from(report.window.days))
        .bind(to_millis(report.generated_at))
        .bind(payload)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_test(&self, test: &NewAbTest) -> Result<AbTest> {
        let mut tx = self.pool.begin().await?;
        let created_at = to_millis(test.created_at);

        let test_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO ab_tests (name, metric_name, state, start_date, end_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&test.name)
        .bind(&test.metric_name)
        .bind(test.state.as_str())
        .bind(to_millis(test.start_date))
        .bind(test.end_date.map(to_millis))
        .bind(created_at)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        for (position, variant) in test.variants.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO ab_variants (test_id, position, name, short_code, is_control, traffic_split)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(test_id)
            .bind(position as i64)
            .bind(&variant.name)
            .bind(&variant.short_code)
            .bind(variant.is_control)
            .bind(variant.traffic_split)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO links (short_code, first_seen_at)
                VALUES ($1, $2)
                ON CONFLICT (short_code) DO NOTHING
                "#,
            )
            .bind(&variant.short_code)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_test(test_id)
            .await?
            .with_context(|| format!("test {test_id} vanished after insert"))
    }

    async fn get_test(&self, test_id: i64) -> Result<Option<AbTest>> {
        let row = sqlx::query_as::<_, TestRow>(&format!(
            "SELECT {TEST_COLUMNS} FROM ab_tests WHERE id = $1"
        ))
        .bind(test_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_tests(&self, after: Option<TestPageKey>, limit: i64) -> Result<Vec<AbTest>> {
        let rows = match after {
            Some(key) => {
                sqlx::query_as::<_, TestRow>(&format!(
                    r#"
                    SELECT {TEST_COLUMNS}
                    FROM ab_tests
                    WHERE (created_at, id) < ($1, $2)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#
                ))
                .bind(to_millis(key.created_at))
                .bind(key.id)
                .bind(limit)
                .fetch_all(self.pool.as_ref())
                .await?
            }
            None => {
                sqlx::query_as::<_, TestRow>(&format!(
                    r#"
                    SELECT {TEST_COLUMNS}
                    FROM ab_tests
                    ORDER BY created_at DESC, id DESC
                    LIMIT $1
                    "#
                ))
                .bind(limit)
                .fetch_all(self.pool.as_ref())
                .await?
            }
        };

        let mut tests = Vec::with_capacity(rows.len());
        for row in rows {
            tests.push(self.hydrate(row).await?);
        }
        Ok(tests)
    }

    async fn update_test_state(&self, test_id: i64, change: &StateChange) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ab_tests
            SET state = $1,
                updated_at = $2,
                stop_reason = COALESCE($3, stop_reason),
                winner_variant_id = COALESCE($4, winner_variant_id)
            WHERE id = $5 AND state = $6
            "#,
        )
        .bind(change.to.as_str())
        .bind(to_millis(change.at))
        .bind(&change.stop_reason)
        .bind(change.winner_variant_id)
        .bind(test_id)
        .bind(change.from.as_str())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_due_tests(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM ab_tests
            WHERE state = 'active' AND end_date IS NOT NULL AND end_date <= $1
            ORDER BY id ASC
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(ids)
    }

    async fn active_tests_for_short_code(&self, short_code: &str) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT t.id FROM ab_tests t
            JOIN ab_variants v ON v.test_id = t.id
            WHERE t.state = 'active' AND v.short_code = $1
            ORDER BY t.id ASC
            "#,
        )
        .bind(short_code)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(ids)
    }

    async fn query_variant_counters(&self, test_id: i64) -> Result<Vec<Variant>> {
        self.variants_for(test_id).await
    }

    async fn record_exposure(
        &self,
        test_id: i64,
        variant_id: i64,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO ab_exposures (test_id, session_id, variant_id, exposed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (test_id, session_id) DO NOTHING
            "#,
        )
        .bind(test_id)
        .bind(session_id)
        .bind(variant_id)
        .bind(to_millis(at))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            sqlx::query(
                "UPDATE ab_variants SET sessions = sessions + 1 WHERE id = $1 AND test_id = $2",
            )
            .bind(variant_id)
            .bind(test_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn record_experiment_conversion(
        &self,
        test_id: i64,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        // The conditional update claims the conversion; a concurrent duplicate sees no row.
        let variant_id = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE ab_exposures SET converted_at = $1
            WHERE test_id = $2 AND session_id = $3 AND converted_at IS NULL
            RETURNING variant_id
            "#,
        )
        .bind(to_millis(at))
        .bind(test_id)
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(variant_id) = variant_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE ab_variants SET conversions = conversions + 1 WHERE id = $1")
            .bind(variant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(variant_id))
    }
}
