//! Question-scoped tier escalation.
//!
//! Each question starts at its declared tier; a low-confidence answer is
//! re-attempted one tier up, bounded by the tier ceiling and the per-company
//! cost cap. Tier T completes before tier T+1 begins.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use prospect_common::{
    ExtractionAnswer, PipelineOptions, Question, Tier, Tier3Gate, TokenUsage,
};

use crate::extract::confidence::{confidence_for, parse_answer};
use crate::extract::prompt::build_prompt;
use crate::traits::AnswerLlm;

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    /// Every answer produced, superseded tiers included.
    pub answers: Vec<ExtractionAnswer>,
    /// Questions whose declared tier exceeds the ceiling (no answer row).
    pub skipped_questions: Vec<String>,
    /// Tier-level dispatch failures the extractor recovered from.
    pub call_errors: Vec<String>,
    /// True when some dispatch failure was non-retryable (e.g. auth).
    pub permanent_failure: bool,
    /// Usage charged by provider-errored items that produced no answer row.
    pub unattributed_usage: TokenUsage,
}

impl ExtractionOutcome {
    pub fn total_usage(&self) -> TokenUsage {
        let mut usage = self.unattributed_usage;
        for answer in &self.answers {
            usage.add(answer.usage);
        }
        usage
    }
}

pub struct TieredExtractor {
    llm: Arc<dyn AnswerLlm>,
    options: PipelineOptions,
}

impl TieredExtractor {
    pub fn new(llm: Arc<dyn AnswerLlm>, options: PipelineOptions) -> Self {
        Self { llm, options }
    }

    /// Max tier this run may reach. Tier 3 requires explicit opt-in.
    fn ceiling(&self) -> Tier {
        match self.options.tier3_gate {
            Tier3Gate::Never => Tier::Two,
            Tier3Gate::OnLowConfidence | Tier3Gate::Always => Tier::Three,
        }
    }

    fn should_escalate(&self, confidence: f64, next: Tier) -> bool {
        if confidence >= self.options.skip_confidence_threshold {
            return false;
        }
        match next {
            Tier::Three => match self.options.tier3_gate {
                Tier3Gate::Never => false,
                Tier3Gate::OnLowConfidence => confidence < self.options.escalation_threshold,
                Tier3Gate::Always => true,
            },
            _ => confidence < self.options.escalation_threshold,
        }
    }

    fn over_cost_cap(&self, spent: f64) -> bool {
        self.options.max_cost_per_company > 0.0 && spent >= self.options.max_cost_per_company
    }

    /// Run the escalation loop over the active question catalog.
    pub async fn extract(
        &self,
        questions: &[Question],
        text_by_type: &BTreeMap<String, String>,
        urls_by_type: &BTreeMap<String, Vec<String>>,
        cancelled: &AtomicBool,
    ) -> ExtractionOutcome {
        let ceiling = self.ceiling();
        let mut outcome = ExtractionOutcome::default();

        // Ascending question id within a tier keeps run output reproducible.
        let mut active: Vec<&Question> = questions.iter().filter(|q| q.active).collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));

        let mut eligible: Vec<&Question> = Vec::new();
        for question in active {
            if question.tier > ceiling {
                outcome.skipped_questions.push(question.id.clone());
            } else {
                eligible.push(question);
            }
        }

        // Index of each question's current final answer in outcome.answers.
        let mut final_answer: HashMap<&str, usize> = HashMap::new();
        let mut last_attempted: HashMap<&str, Tier> = HashMap::new();
        let mut carried: Vec<&Question> = Vec::new();
        let mut spent = 0.0_f64;

        let mut tier = Tier::One;
        loop {
            if cancelled.load(Ordering::Relaxed) {
                outcome.call_errors.push("cancelled".to_string());
                break;
            }
            if self.over_cost_cap(spent) {
                info!(
                    spent_usd = spent,
                    cap_usd = self.options.max_cost_per_company,
                    tier = %tier,
                    "Cost cap reached, no new tier started"
                );
                break;
            }

            let mut due: Vec<&Question> = eligible
                .iter()
                .filter(|q| q.tier == tier)
                .copied()
                .collect();
            due.extend(carried.drain(..));
            due.sort_by(|a, b| a.id.cmp(&b.id));
            due.dedup_by(|a, b| a.id == b.id);

            if !due.is_empty() {
                for question in &due {
                    last_attempted.insert(question.id.as_str(), tier);
                }

                let prompts = due
                    .iter()
                    .map(|q| build_prompt(q, text_by_type, tier))
                    .collect();

                match self.llm.answer(tier, prompts).await {
                    Ok(raws) => {
                        for question in &due {
                            let raw = raws.iter().find(|r| r.question_id == question.id);
                            let Some(raw) = raw else { continue };
                            spent += raw.usage.cost_usd;

                            let Some(ref text) = raw.text else {
                                // Item-level provider failure; retry upward.
                                outcome.unattributed_usage.add(raw.usage);
                                if let Some(next) = tier.next() {
                                    if next <= ceiling {
                                        carried.push(*question);
                                    }
                                }
                                continue;
                            };

                            let prior_value = final_answer
                                .get(question.id.as_str())
                                .map(|&i| outcome.answers[i].value.clone());
                            let parsed = parse_answer(text);
                            let confidence = confidence_for(&parsed, prior_value.as_deref());

                            if let Some(&i) = final_answer.get(question.id.as_str()) {
                                outcome.answers[i].superseded = true;
                            }

                            let source_urls = question
                                .page_types
                                .iter()
                                .filter_map(|t| urls_by_type.get(t))
                                .flatten()
                                .cloned()
                                .collect();

                            outcome.answers.push(ExtractionAnswer {
                                question_id: question.id.clone(),
                                field_key: question.field_key.clone(),
                                value: parsed.value,
                                confidence,
                                tier,
                                source_urls,
                                usage: raw.usage,
                                superseded: false,
                            });
                            final_answer
                                .insert(question.id.as_str(), outcome.answers.len() - 1);

                            if let Some(next) = tier.next() {
                                if next <= ceiling && self.should_escalate(confidence, next) {
                                    carried.push(*question);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(tier = %tier, error = %e, "Tier dispatch failed");
                        if let Some(ai) = e.downcast_ref::<ai_client::AiError>() {
                            if !ai.is_retryable() {
                                outcome.permanent_failure = true;
                            }
                        }
                        outcome.call_errors.push(format!("{tier}: {e}"));
                        // The whole tier failed; carry its questions upward.
                        if let Some(next) = tier.next() {
                            if next <= ceiling {
                                carried.extend(due);
                            }
                        }
                    }
                }
            }

            match tier.next() {
                Some(next) if next <= ceiling => tier = next,
                _ => break,
            }
            // All questions finalized and none declared at the remaining tiers.
            if carried.is_empty() && !eligible.iter().any(|q| q.tier >= tier) {
                break;
            }
        }

        // Questions that never produced an answer finalize empty at the
        // last tier that attempted them.
        for question in &eligible {
            if final_answer.contains_key(question.id.as_str()) {
                continue;
            }
            let tier = last_attempted
                .get(question.id.as_str())
                .copied()
                .unwrap_or(question.tier);
            outcome.answers.push(ExtractionAnswer {
                question_id: question.id.clone(),
                field_key: question.field_key.clone(),
                value: String::new(),
                confidence: 0.0,
                tier,
                source_urls: Vec::new(),
                usage: TokenUsage::default(),
                superseded: false,
            });
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockLlm, SENTINEL_UNAVAILABLE};
    use prospect_common::Tier3Gate;

    fn question(id: &str, tier: Tier, field_key: &str) -> Question {
        Question {
            id: id.into(),
            text: format!("What is {field_key}?"),
            tier,
            field_key: field_key.into(),
            page_types: vec!["homepage".into()],
            instructions: None,
            output_format: None,
            active: true,
        }
    }

    fn pages() -> BTreeMap<String, String> {
        [(
            "homepage".to_string(),
            "Acme builds widgets. 120 employees.".to_string(),
        )]
        .into()
    }

    fn urls() -> BTreeMap<String, Vec<String>> {
        [("homepage".to_string(), vec!["https://acme.com".to_string()])].into()
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            escalation_threshold: 0.4,
            skip_confidence_threshold: 0.8,
            quality_score_threshold: 0.5,
            tier3_gate: Tier3Gate::Never,
            max_cost_per_company: 0.0,
        }
    }

    #[tokio::test]
    async fn confident_tier1_answer_finalizes() {
        let llm = Arc::new(
            MockLlm::new().answer_json("q1", "widgets", 0.9),
        );
        let extractor = TieredExtractor::new(llm.clone(), options());

        let questions = [question("q1", Tier::One, "industry")];
        let outcome = extractor
            .extract(&questions, &pages(), &urls(), &AtomicBool::new(false))
            .await;

        assert_eq!(outcome.answers.len(), 1);
        let answer = &outcome.answers[0];
        assert_eq!(answer.value, "widgets");
        assert_eq!(answer.tier, Tier::One);
        assert!(!answer.superseded);
        assert_eq!(llm.calls_at(Tier::Two), 0);
    }

    #[tokio::test]
    async fn low_confidence_escalates_and_supersedes() {
        let llm = Arc::new(
            MockLlm::new()
                .answer_json_at(Tier::One, "q1", "", 0.1)
                .answer_json_at(Tier::Two, "q1", "industrial tools", 0.8),
        );
        let extractor = TieredExtractor::new(llm.clone(), options());

        let questions = [question("q1", Tier::One, "industry")];
        let outcome = extractor
            .extract(&questions, &pages(), &urls(), &AtomicBool::new(false))
            .await;

        assert_eq!(outcome.answers.len(), 2);
        assert!(outcome.answers[0].superseded);
        assert_eq!(outcome.answers[0].tier, Tier::One);
        let final_answer: Vec<_> = outcome.answers.iter().filter(|a| !a.superseded).collect();
        assert_eq!(final_answer.len(), 1);
        assert_eq!(final_answer[0].tier, Tier::Two);
        assert_eq!(final_answer[0].value, "industrial tools");
    }

    #[tokio::test]
    async fn escalation_only_for_low_confidence_questions() {
        let llm = Arc::new(
            MockLlm::new()
                .answer_json_at(Tier::One, "q1", "", 0.1)
                .answer_json_at(Tier::One, "q2", "120", 0.9)
                .answer_json_at(Tier::Two, "q1", "industrial tools", 0.8),
        );
        let extractor = TieredExtractor::new(llm.clone(), options());

        let questions = [
            question("q1", Tier::One, "industry"),
            question("q2", Tier::One, "employee_count"),
        ];
        let outcome = extractor
            .extract(&questions, &pages(), &urls(), &AtomicBool::new(false))
            .await;

        // q2 never reached tier 2.
        assert_eq!(llm.prompt_count_at(Tier::Two), 1);
        let finals: Vec<_> = outcome.answers.iter().filter(|a| !a.superseded).collect();
        assert_eq!(finals.len(), 2);
    }

    #[tokio::test]
    async fn ceiling_skips_questions_declared_above_it() {
        let llm = Arc::new(MockLlm::new().answer_json("q1", "widgets", 0.9));
        let extractor = TieredExtractor::new(llm, options());

        let questions = [
            question("q1", Tier::One, "industry"),
            question("q3", Tier::Three, "strategy"),
        ];
        let outcome = extractor
            .extract(&questions, &pages(), &urls(), &AtomicBool::new(false))
            .await;

        assert_eq!(outcome.skipped_questions, ["q3"]);
        assert_eq!(outcome.answers.len(), 1);
    }

    #[tokio::test]
    async fn unanswered_question_finalizes_empty() {
        let llm = Arc::new(MockLlm::new().answer_text("q1", SENTINEL_UNAVAILABLE));
        let extractor = TieredExtractor::new(llm, options());

        let questions = [question("q1", Tier::One, "industry")];
        let outcome = extractor
            .extract(&questions, &pages(), &urls(), &AtomicBool::new(false))
            .await;

        assert_eq!(outcome.answers.len(), 1);
        assert_eq!(outcome.answers[0].value, "");
        assert_eq!(outcome.answers[0].confidence, 0.0);
        // Attempted at both tiers, finalized at the last.
        assert_eq!(outcome.answers[0].tier, Tier::Two);
    }

    #[tokio::test]
    async fn cost_cap_stops_new_tiers() {
        let llm = Arc::new(
            MockLlm::new()
                .answer_json_at(Tier::One, "q1", "", 0.1)
                .cost_per_call(0.5),
        );
        let mut opts = options();
        opts.max_cost_per_company = 0.4;
        let extractor = TieredExtractor::new(llm.clone(), opts);

        let questions = [question("q1", Tier::One, "industry")];
        let outcome = extractor
            .extract(&questions, &pages(), &urls(), &AtomicBool::new(false))
            .await;

        // Tier 1 ran, crossed the cap, tier 2 never started.
        assert_eq!(llm.calls_at(Tier::Two), 0);
        let total = outcome.total_usage();
        assert!(total.cost_usd <= 0.5 + 1e-9);
    }

    #[tokio::test]
    async fn tier3_gate_always_still_respects_cap() {
        let llm = Arc::new(
            MockLlm::new()
                .answer_json_at(Tier::One, "q1", "", 0.1)
                .answer_json_at(Tier::Two, "q1", "maybe", 0.5)
                .answer_json_at(Tier::Three, "q1", "surely", 0.9)
                .cost_per_call(0.3),
        );
        let mut opts = options();
        opts.tier3_gate = Tier3Gate::Always;
        opts.max_cost_per_company = 0.5;
        let extractor = TieredExtractor::new(llm.clone(), opts);

        let questions = [question("q1", Tier::One, "industry")];
        extractor
            .extract(&questions, &pages(), &urls(), &AtomicBool::new(false))
            .await;

        // Tiers 1 and 2 put spend at 0.6 ≥ 0.5; the always-gate would
        // escalate again, but the cap wins and tier 3 never starts.
        assert_eq!(llm.calls_at(Tier::Two), 1);
        assert_eq!(llm.calls_at(Tier::Three), 0);
    }

    #[tokio::test]
    async fn skip_confidence_blocks_always_gate() {
        let llm = Arc::new(
            MockLlm::new().answer_json_at(Tier::One, "q1", "widgets", 0.95),
        );
        let mut opts = options();
        opts.tier3_gate = Tier3Gate::Always;
        let extractor = TieredExtractor::new(llm.clone(), opts);

        let questions = [question("q1", Tier::One, "industry")];
        extractor
            .extract(&questions, &pages(), &urls(), &AtomicBool::new(false))
            .await;

        assert_eq!(llm.calls_at(Tier::Two), 0);
        assert_eq!(llm.calls_at(Tier::Three), 0);
    }

    #[tokio::test]
    async fn tier_dispatch_failure_carries_questions_up() {
        let llm = Arc::new(
            MockLlm::new()
                .fail_at(Tier::One)
                .answer_json_at(Tier::Two, "q1", "widgets", 0.9),
        );
        let extractor = TieredExtractor::new(llm, options());

        let questions = [question("q1", Tier::One, "industry")];
        let outcome = extractor
            .extract(&questions, &pages(), &urls(), &AtomicBool::new(false))
            .await;

        assert_eq!(outcome.call_errors.len(), 1);
        let finals: Vec<_> = outcome.answers.iter().filter(|a| !a.superseded).collect();
        assert_eq!(finals[0].tier, Tier::Two);
        assert_eq!(finals[0].value, "widgets");
    }
}
