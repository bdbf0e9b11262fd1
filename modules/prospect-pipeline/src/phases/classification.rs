//! Classification: assign a page type to pages whose path hint was
//! ambiguous. Skipped entirely when every page already has a confident
//! assignment.

use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tracing::{debug, warn};

use prospect_common::{PhaseName, Run, TokenUsage};

use crate::context::RunContext;
use crate::phases::{PhaseExecutor, PhaseOutcome};
use crate::runner::PipelineDeps;

pub struct Classification;

#[async_trait]
impl PhaseExecutor for Classification {
    fn name(&self) -> PhaseName {
        PhaseName::Classification
    }

    async fn execute(
        &self,
        deps: &PipelineDeps,
        ctx: &mut RunContext,
        _run: &mut Run,
    ) -> PhaseOutcome {
        if ctx.pages.iter().all(|p| !p.is_ambiguous()) {
            return PhaseOutcome::skipped();
        }

        let mut usage = TokenUsage::default();
        for page in ctx.pages.iter_mut().filter(|p| p.is_ambiguous()) {
            if deps.cancelled.load(Ordering::Relaxed) {
                return PhaseOutcome::cancelled();
            }

            match deps.llm.classify(&page.text, &page.candidates).await {
                Ok((page_type, call_usage)) => {
                    debug!(url = page.url.as_str(), page_type = page_type.as_str(), "Page classified");
                    page.page_type = Some(page_type);
                    usage.add(call_usage);
                }
                Err(e) => {
                    // Degrade to the first candidate rather than failing the run.
                    warn!(url = page.url.as_str(), error = %e, "Classification failed, using first candidate");
                    ctx.warnings
                        .push(format!("classification failed for {}: {e}", page.url));
                    page.page_type = page.candidates.first().cloned();
                }
            }
        }

        PhaseOutcome::success(usage)
    }
}
