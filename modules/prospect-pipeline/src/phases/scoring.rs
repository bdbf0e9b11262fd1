//! Scoring: a deterministic 0..1 score reproducible from the Run state
//! alone: (fraction of required fields valid) * (weighted mean confidence).

use async_trait::async_trait;

use prospect_common::{FieldRegistry, FieldValue, PhaseName, Run, TokenUsage, ValidationStatus};

use crate::context::RunContext;
use crate::phases::{PhaseExecutor, PhaseOutcome};
use crate::runner::PipelineDeps;

fn is_usable(value: &FieldValue) -> bool {
    matches!(
        value.status,
        ValidationStatus::Valid | ValidationStatus::Truncated
    )
}

/// Weighted mean confidence over usable field values. Required fields weigh
/// double.
pub fn aggregate_confidence(values: &[FieldValue], fields: &FieldRegistry) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for value in values.iter().filter(|v| is_usable(v)) {
        let required = fields.get(&value.field_key).is_some_and(|m| m.required);
        let weight = if required { 2.0 } else { 1.0 };
        weighted_sum += value.confidence * weight;
        weight_total += weight;
    }
    if weight_total == 0.0 {
        0.0
    } else {
        weighted_sum / weight_total
    }
}

pub fn compute_score(values: &[FieldValue], fields: &FieldRegistry) -> f64 {
    let required = fields.required_keys();
    let required_fraction = if required.is_empty() {
        1.0
    } else {
        let usable = required
            .iter()
            .filter(|key| {
                values
                    .iter()
                    .any(|v| v.field_key == **key && is_usable(v))
            })
            .count();
        usable as f64 / required.len() as f64
    };

    required_fraction * aggregate_confidence(values, fields)
}

pub struct Scoring;

#[async_trait]
impl PhaseExecutor for Scoring {
    fn name(&self) -> PhaseName {
        PhaseName::Scoring
    }

    async fn execute(
        &self,
        deps: &PipelineDeps,
        _ctx: &mut RunContext,
        run: &mut Run,
    ) -> PhaseOutcome {
        let confidence = aggregate_confidence(&run.field_values, &deps.catalogs.fields);
        run.score = compute_score(&run.field_values, &deps.catalogs.fields);
        run.low_quality = confidence < deps.options.quality_score_threshold;
        PhaseOutcome::success(TokenUsage::default())
    }
}
