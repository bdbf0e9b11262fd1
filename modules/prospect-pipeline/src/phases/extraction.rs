//! Extraction: run the tiered extractor over the question catalog and the
//! scraped page map.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tracing::info;

use prospect_common::{ErrorCategory, PhaseName, Run};

use crate::context::RunContext;
use crate::extract::TieredExtractor;
use crate::phases::{PhaseExecutor, PhaseOutcome};
use crate::runner::PipelineDeps;

pub struct Extraction;

#[async_trait]
impl PhaseExecutor for Extraction {
    fn name(&self) -> PhaseName {
        PhaseName::Extraction
    }

    async fn execute(
        &self,
        deps: &PipelineDeps,
        ctx: &mut RunContext,
        run: &mut Run,
    ) -> PhaseOutcome {
        let text_by_type = ctx.text_by_page_type();

        let mut urls_by_type: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for page in &ctx.pages {
            if let Some(ref page_type) = page.page_type {
                urls_by_type
                    .entry(page_type.clone())
                    .or_default()
                    .push(page.url.clone());
            }
        }

        let extractor = TieredExtractor::new(deps.llm.clone(), deps.options.clone());
        let outcome = extractor
            .extract(
                &deps.catalogs.questions,
                &text_by_type,
                &urls_by_type,
                &deps.cancelled,
            )
            .await;

        let usage = outcome.total_usage();

        if deps.cancelled.load(Ordering::Relaxed) {
            return PhaseOutcome::cancelled();
        }

        for question_id in &outcome.skipped_questions {
            ctx.warnings
                .push(format!("question {question_id} above tier ceiling, skipped"));
        }
        ctx.warnings.extend(outcome.call_errors.iter().cloned());

        let all_empty = outcome
            .answers
            .iter()
            .filter(|a| !a.superseded)
            .all(|a| a.value.trim().is_empty());
        if all_empty && !outcome.call_errors.is_empty() {
            let category = if outcome.permanent_failure {
                ErrorCategory::Permanent
            } else {
                ErrorCategory::Transient
            };
            run.answers = outcome.answers;
            return PhaseOutcome::failed(
                format!(
                    "extraction produced no answers: {}",
                    outcome.call_errors.join("; ")
                ),
                category,
                usage,
            );
        }

        info!(
            company = run.company.url.as_str(),
            answers = outcome.answers.iter().filter(|a| !a.superseded).count(),
            superseded = outcome.answers.iter().filter(|a| a.superseded).count(),
            cost_usd = usage.cost_usd,
            "Extraction complete"
        );
        run.answers = outcome.answers;
        PhaseOutcome::success(usage)
    }
}
