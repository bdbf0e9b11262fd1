//! SQL-backed run store.
//!
//! One row per run with the full record embedded as JSON; scalar columns
//! carry the filterable fields. Works against `postgres://` and `sqlite://`
//! URLs through the sqlx Any driver.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::info;
use uuid::Uuid;

use prospect_common::{Phase, Run, RunStatus};

use crate::{RunFilter, RunStore, StoreStats};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    company_url TEXT NOT NULL,
    status TEXT NOT NULL,
    error_category TEXT,
    score REAL NOT NULL DEFAULT 0,
    total_cost REAL NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    /// Connect and bootstrap the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open run store at {database_url}"))?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs (created_at)")
            .execute(&pool)
            .await?;

        info!(database_url, "Run store ready");
        Ok(Self { pool })
    }

    fn row_to_run(row: &AnyRow) -> Result<Run> {
        let data: String = row.try_get("data")?;
        serde_json::from_str(&data).context("malformed run row")
    }

    fn timestamp(ts: DateTime<Utc>) -> String {
        // RFC3339 in UTC sorts lexicographically, which list_runs relies on.
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    async fn write(&self, run: &Run, insert: bool) -> Result<()> {
        let data = serde_json::to_string(run)?;
        let category = run.error.as_ref().map(|e| e.category.to_string());

        let sql = if insert {
            "INSERT INTO runs (id, company_url, status, error_category, score, total_cost, data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        } else {
            "UPDATE runs SET company_url = $2, status = $3, error_category = $4, score = $5, \
             total_cost = $6, data = $7, created_at = $8, updated_at = $9 WHERE id = $1"
        };

        sqlx::query(sql)
            .bind(run.id.to_string())
            .bind(&run.company.url)
            .bind(run.status.to_string())
            .bind(category)
            .bind(run.score)
            .bind(run.total_cost_usd)
            .bind(data)
            .bind(Self::timestamp(run.created_at))
            .bind(Self::timestamp(run.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for SqlStore {
    async fn create_run(&self, run: &Run) -> Result<Uuid> {
        self.write(run, true).await?;
        Ok(run.id)
    }

    async fn update_run(&self, run: &Run) -> Result<()> {
        self.write(run, false).await
    }

    async fn append_phase(&self, run_id: Uuid, phase: Phase) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT data FROM runs WHERE id = $1")
            .bind(run_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .with_context(|| format!("run {run_id} not found"))?;
        let data: String = row.try_get("data")?;
        let mut run: Run = serde_json::from_str(&data).context("malformed run row")?;

        run.record_phase(phase);

        let data = serde_json::to_string(&run)?;
        sqlx::query("UPDATE runs SET data = $2, updated_at = $3 WHERE id = $1")
            .bind(run_id.to_string())
            .bind(data)
            .bind(Self::timestamp(run.updated_at))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT data FROM runs WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut sql = String::from("SELECT data FROM runs");
        let mut conditions: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            binds.push(status.to_string());
            conditions.push(format!("status = ${}", binds.len()));
        }
        if let Some(ref url) = filter.company_url {
            binds.push(url.clone());
            conditions.push(format!("company_url = ${}", binds.len()));
        }
        if let Some(category) = filter.error_category {
            binds.push(category.to_string());
            conditions.push(format!("error_category = ${}", binds.len()));
        }
        if let Some(after) = filter.created_after {
            binds.push(Self::timestamp(after));
            conditions.push(format!("created_at > ${}", binds.len()));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");
        if filter.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", filter.limit));
        }

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
             SUM(CASE WHEN status = $1 THEN 1 ELSE 0 END) AS complete, \
             SUM(CASE WHEN status = $2 THEN 1 ELSE 0 END) AS failed, \
             SUM(total_cost) AS cost FROM runs",
        )
        .bind(RunStatus::Complete.to_string())
        .bind(RunStatus::Failed.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            total_runs: row.try_get::<i64, _>("total").unwrap_or(0) as u64,
            complete: row.try_get::<i64, _>("complete").unwrap_or(0) as u64,
            failed: row.try_get::<i64, _>("failed").unwrap_or(0) as u64,
            total_cost_usd: row.try_get::<f64, _>("cost").unwrap_or(0.0),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
