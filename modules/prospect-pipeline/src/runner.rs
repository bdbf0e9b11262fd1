//! Per-company pipeline runner: walks the fixed phase table, commits the
//! Run to the store after every phase, and classifies failures once at the
//! phase boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use prospect_common::{
    Phase, PhaseName, PhaseStatus, PipelineOptions, Run, RunError, RunStatus,
};
use prospect_store::RunStore;

use crate::context::RunContext;
use crate::phases::{
    Classification, DataCollection, Extraction, PhaseExecutor, PhaseOutcome, Scoring,
    Validation, WriteBack,
};
use crate::registry::Registry;
use crate::scrape::ScrapeChain;
use crate::traits::{AnswerLlm, CrmWriter, LeadRegistry};

/// Shared dependencies for every run in a batch. Registries are loaded once
/// and read-only from here on.
pub struct PipelineDeps {
    pub chain: Arc<ScrapeChain>,
    pub llm: Arc<dyn AnswerLlm>,
    pub crm: Option<Arc<dyn CrmWriter>>,
    pub lead_registry: Option<Arc<dyn LeadRegistry>>,
    pub catalogs: Arc<Registry>,
    pub store: Arc<dyn RunStore>,
    pub options: PipelineOptions,
    pub cancelled: Arc<AtomicBool>,
}

/// The fixed phase order. Write-back last; classification may record
/// itself as skipped but is never absent.
fn phase_table() -> Vec<Box<dyn PhaseExecutor>> {
    vec![
        Box::new(DataCollection),
        Box::new(Classification),
        Box::new(Extraction),
        Box::new(Validation),
        Box::new(Scoring),
        Box::new(WriteBack),
    ]
}

#[derive(Clone)]
pub struct PipelineRunner {
    deps: Arc<PipelineDeps>,
}

impl PipelineRunner {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &Arc<PipelineDeps> {
        &self.deps
    }

    /// Drive one company to a terminal Run. Per-company failures come back
    /// as `Ok` with `Run.status == Failed`; `Err` means the store itself is
    /// broken.
    pub async fn run(&self, company: prospect_common::Company) -> Result<Run> {
        let mut run = Run::new(company);
        info!(
            run_id = %run.id,
            company = run.company.url.as_str(),
            "Run started"
        );
        self.deps.store.create_run(&run).await?;

        let mut ctx = RunContext::new();

        for executor in phase_table() {
            let phase_name = executor.name();

            let outcome = if self.deps.cancelled.load(Ordering::Relaxed) {
                let outcome = PhaseOutcome::cancelled();
                record_outcome(&mut run, phase_name, 0, &outcome);
                outcome
            } else {
                run.status = phase_name.run_status();
                self.deps.store.update_run(&run).await?;

                let started = Instant::now();
                let outcome = executor.execute(&self.deps, &mut ctx, &mut run).await;
                let elapsed = started.elapsed().as_millis() as u64;
                record_outcome(&mut run, phase_name, elapsed, &outcome);
                outcome
            };

            if let Some((message, category)) = outcome.error {
                if phase_name == PhaseName::WriteBack {
                    // Write-back failure never rolls back extraction; an
                    // operator process reconciles later.
                    warn!(
                        run_id = %run.id,
                        error = message.as_str(),
                        "Write-back failed, run stays complete"
                    );
                    run.finalize_complete();
                    self.deps.store.update_run(&run).await?;
                    return Ok(run);
                }

                run.finalize_failed(RunError {
                    message: message.clone(),
                    category,
                    failed_phase: phase_name,
                });
                self.deps.store.update_run(&run).await?;
                self.mark_lead_failed(&run).await;
                warn!(
                    run_id = %run.id,
                    company = run.company.url.as_str(),
                    phase = %phase_name,
                    category = %category,
                    error = message.as_str(),
                    "Run failed"
                );
                return Ok(run);
            }

            self.deps.store.update_run(&run).await?;
        }

        run.finalize_complete();
        self.deps.store.update_run(&run).await?;
        info!(
            run_id = %run.id,
            company = run.company.url.as_str(),
            score = run.score,
            low_quality = run.low_quality,
            tokens = run.total_tokens,
            cost_usd = run.total_cost_usd,
            "Run complete"
        );
        Ok(run)
    }

    /// Best-effort lead status transition for a failed run.
    async fn mark_lead_failed(&self, run: &Run) {
        let Some(ref registry) = self.deps.lead_registry else {
            return;
        };
        if run.company.lead_id.is_empty() {
            return;
        }
        if let Err(e) = registry
            .write_lead(
                &run.company.lead_id,
                Some(crate::phases::write_back::LEAD_STATUS_FAILED),
                &Default::default(),
            )
            .await
        {
            warn!(run_id = %run.id, error = %e, "Could not mark lead failed");
        }
    }
}

/// Fold a phase outcome into the run's phase list.
fn record_outcome(run: &mut Run, name: PhaseName, duration_ms: u64, outcome: &PhaseOutcome) {
    let phase = match outcome.status {
        PhaseStatus::Skipped => Phase::skipped(name),
        PhaseStatus::Failed => Phase::failed(
            name,
            duration_ms,
            outcome.usage,
            outcome
                .error
                .as_ref()
                .map(|(m, _)| m.clone())
                .unwrap_or_default(),
        ),
        _ => Phase::success(name, duration_ms, outcome.usage),
    };
    run.record_phase(phase);
}

/// Convenience check used by callers that only see a terminal Run.
pub fn run_succeeded(run: &Run) -> bool {
    run.status == RunStatus::Complete
}
