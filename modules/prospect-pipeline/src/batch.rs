//! Batch driver: bounded fan-out of pipeline runs with per-company failure
//! isolation.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use prospect_common::{BatchStats, Company, ErrorCategory};

use crate::runner::{run_succeeded, PipelineDeps, PipelineRunner};

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: u32,
    pub failed: u32,
    pub stats: BatchStats,
}

pub struct BatchDriver {
    deps: Arc<PipelineDeps>,
    max_concurrent: usize,
}

impl BatchDriver {
    pub fn new(deps: Arc<PipelineDeps>, max_concurrent: usize) -> Self {
        Self {
            deps,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run every lead to a terminal state. One company's failure never
    /// aborts the batch; fatal setup errors (store open, registry load)
    /// happen before this call.
    pub async fn run(&self, leads: Vec<Company>) -> BatchReport {
        let total = leads.len();
        info!(
            leads = total,
            max_concurrent = self.max_concurrent,
            "Batch started"
        );

        let runner = PipelineRunner::new(self.deps.clone());
        let results: Vec<_> = stream::iter(leads.into_iter().map(|company| {
            let runner = runner.clone();
            let cancelled = self.deps.cancelled.clone();
            async move {
                let url = company.url.clone();
                // Cancellation stops dispatch of new leads; leads already
                // in flight observe the flag inside their own runner.
                if cancelled.load(Ordering::Relaxed) {
                    info!(company = url.as_str(), "Batch cancelled, lead not dispatched");
                    return (url, None);
                }
                (url, Some(runner.run(company).await))
            }
        }))
        .buffer_unordered(self.max_concurrent)
        .collect()
        .await;

        let mut report = BatchReport::default();
        report.stats.companies = total as u32;

        for (url, result) in results {
            match result {
                Some(Ok(run)) => {
                    report.stats.total_tokens += run.total_tokens;
                    report.stats.total_cost_usd += run.total_cost_usd;
                    if run_succeeded(&run) {
                        report.succeeded += 1;
                        if run.low_quality {
                            report.stats.low_quality += 1;
                        }
                    } else {
                        report.failed += 1;
                        match run.error.as_ref().map(|e| e.category) {
                            Some(ErrorCategory::Permanent) => {
                                report.stats.permanent_failures += 1
                            }
                            _ => report.stats.transient_failures += 1,
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(company = url.as_str(), error = %e, "Run aborted");
                    report.failed += 1;
                    report.stats.transient_failures += 1;
                }
                // Never dispatched; still counted so succeeded + failed
                // covers every input lead.
                None => {
                    report.failed += 1;
                    report.stats.transient_failures += 1;
                }
            }
        }

        report.stats.succeeded = report.succeeded;
        report.stats.failed = report.failed;

        info!(stats = %report.stats, "Batch complete");
        report
    }
}
