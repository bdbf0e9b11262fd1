//! In-memory store for tests and ad-hoc single runs.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use prospect_common::{Phase, Run, RunStatus};

use crate::{RunFilter, RunStore, StoreStats};

#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<Uuid, Run>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &Run) -> Result<Uuid> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(run.id)
    }

    async fn update_run(&self, run: &Run) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn append_phase(&self, run_id: Uuid, phase: Phase) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .with_context(|| format!("run {run_id} not found"))?;
        run.record_phase(phase);
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let runs = self.runs.read().await;
        let mut matched: Vec<Run> = runs
            .values()
            .filter(|run| {
                filter.status.is_none_or(|s| run.status == s)
                    && filter
                        .company_url
                        .as_ref()
                        .is_none_or(|u| &run.company.url == u)
                    && filter.error_category.is_none_or(|c| {
                        run.error.as_ref().map(|e| e.category) == Some(c)
                    })
                    && filter.created_after.is_none_or(|t| run.created_at > t)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if filter.limit > 0 {
            matched.truncate(filter.limit);
        }
        Ok(matched)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let runs = self.runs.read().await;
        Ok(StoreStats {
            total_runs: runs.len() as u64,
            complete: runs
                .values()
                .filter(|r| r.status == RunStatus::Complete)
                .count() as u64,
            failed: runs
                .values()
                .filter(|r| r.status == RunStatus::Failed)
                .count() as u64,
            total_cost_usd: runs.values().map(|r| r.total_cost_usd).sum(),
        })
    }

    async fn close(&self) {}
}
