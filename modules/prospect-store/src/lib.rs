//! Durable persistence for enrichment runs.
//!
//! The pipeline depends only on the narrow [`RunStore`] trait; `SqlStore`
//! backs it with Postgres or SQLite (one code path via the sqlx Any driver),
//! `MemoryStore` backs tests.

pub mod memory;
pub mod sql;

pub use memory::MemoryStore;
pub use sql::SqlStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use prospect_common::{ErrorCategory, Phase, Run, RunStatus};

/// Filter for [`RunStore::list_runs`]. Results are ordered by created_at
/// descending.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub company_url: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub created_after: Option<DateTime<Utc>>,
    /// 0 = no limit.
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_runs: u64,
    pub complete: u64,
    pub failed: u64,
    pub total_cost_usd: f64,
}

/// The store is authoritative: the runner writes after every phase
/// transition, so a crash leaves the Run at its last committed phase.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &Run) -> Result<Uuid>;

    /// Upsert the full record. Atomic with respect to readers.
    async fn update_run(&self, run: &Run) -> Result<()>;

    /// Append one phase to the run's phase list.
    async fn append_phase(&self, run_id: Uuid, phase: Phase) -> Result<()>;

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>>;

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn close(&self);
}
