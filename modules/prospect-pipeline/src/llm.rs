//! Anthropic-backed answer provider. One Messages call for a lone question,
//! one Message Batch per tier otherwise, so a tier's failures never bleed
//! into another tier.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use ai_client::{
    AnthropicClient, BatchRequestItem, BatchResult, ChatRequest, Usage, WireMessage,
};
use prospect_common::{Tier, TokenUsage};

use crate::traits::{AnswerLlm, QuestionPrompt, RawAnswer};

/// Bound on one tier's batch dispatch, poll included.
const BATCH_DEADLINE: Duration = Duration::from_secs(120);

const ANSWER_MAX_TOKENS: u32 = 1024;

/// Model identifiers for the three extraction tiers.
#[derive(Debug, Clone)]
pub struct TierModels {
    pub haiku: String,
    pub sonnet: String,
    pub opus: String,
}

impl TierModels {
    pub fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::One => &self.haiku,
            Tier::Two => &self.sonnet,
            Tier::Three => &self.opus,
        }
    }
}

/// USD per million input/output tokens, by tier.
fn price_per_million(tier: Tier) -> (f64, f64) {
    match tier {
        Tier::One => (0.80, 4.00),
        Tier::Two => (3.00, 15.00),
        Tier::Three => (15.00, 75.00),
    }
}

pub fn usage_for_tier(tier: Tier, usage: Usage) -> TokenUsage {
    let (input_price, output_price) = price_per_million(tier);
    TokenUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cost_usd: usage.input_tokens as f64 * input_price / 1e6
            + usage.output_tokens as f64 * output_price / 1e6,
    }
}

pub struct AnthropicLlm {
    client: AnthropicClient,
    models: TierModels,
}

impl AnthropicLlm {
    pub fn new(client: AnthropicClient, models: TierModels) -> Self {
        Self { client, models }
    }

    fn request_for(&self, tier: Tier, prompt: &QuestionPrompt) -> ChatRequest {
        ChatRequest::new(self.models.model_for(tier))
            .system(&prompt.system)
            .message(WireMessage::user(&prompt.user))
            .max_tokens(ANSWER_MAX_TOKENS)
            .temperature(0.0)
    }
}

#[async_trait]
impl AnswerLlm for AnthropicLlm {
    async fn answer(&self, tier: Tier, prompts: Vec<QuestionPrompt>) -> Result<Vec<RawAnswer>> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        if prompts.len() == 1 {
            let prompt = &prompts[0];
            let response = self
                .client
                .message(&self.request_for(tier, prompt))
                .await
                .with_context(|| format!("{tier} answer for question {}", prompt.question_id))?;
            return Ok(vec![RawAnswer {
                question_id: prompt.question_id.clone(),
                text: Some(response.text()),
                usage: usage_for_tier(tier, response.usage),
            }]);
        }

        debug!(tier = %tier, questions = prompts.len(), "Dispatching tier batch");

        let items: Vec<BatchRequestItem> = prompts
            .iter()
            .map(|p| BatchRequestItem {
                custom_id: p.question_id.clone(),
                params: self.request_for(tier, p),
            })
            .collect();

        let results = self
            .client
            .run_batch(items, BATCH_DEADLINE)
            .await
            .with_context(|| format!("{tier} batch"))?;

        let mut answers = Vec::with_capacity(prompts.len());
        for prompt in &prompts {
            let line = results.iter().find(|l| l.custom_id == prompt.question_id);
            let answer = match line.map(|l| &l.result) {
                Some(BatchResult::Succeeded { message }) => RawAnswer {
                    question_id: prompt.question_id.clone(),
                    text: Some(message.text()),
                    usage: usage_for_tier(tier, message.usage),
                },
                Some(BatchResult::Errored { error }) => {
                    warn!(question_id = prompt.question_id.as_str(), %error, "Batch item errored");
                    RawAnswer {
                        question_id: prompt.question_id.clone(),
                        text: None,
                        usage: TokenUsage::default(),
                    }
                }
                Some(BatchResult::Canceled) | Some(BatchResult::Expired) | None => RawAnswer {
                    question_id: prompt.question_id.clone(),
                    text: None,
                    usage: TokenUsage::default(),
                },
            };
            answers.push(answer);
        }
        Ok(answers)
    }

    async fn classify(&self, text: &str, candidates: &[String]) -> Result<(String, TokenUsage)> {
        let system = "You classify scraped company web pages. Reply with exactly one \
                      page type from the list, nothing else.";
        let excerpt: String = text.chars().take(4000).collect();
        let user = format!(
            "Page types: {}\n\nPage content:\n{excerpt}\n\nWhich page type fits best?",
            candidates.join(", "),
        );

        let request = ChatRequest::new(&self.models.haiku)
            .system(system)
            .message(WireMessage::user(user))
            .max_tokens(32)
            .temperature(0.0);

        let response = self.client.message(&request).await.context("page classification")?;
        let reply = response.text().trim().to_lowercase();

        let chosen = candidates
            .iter()
            .find(|c| reply.contains(&c.to_lowercase()))
            .cloned()
            .unwrap_or_else(|| candidates[0].clone());

        Ok((chosen, usage_for_tier(Tier::One, response.usage)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_scales_with_tier() {
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 0,
        };
        let t1 = usage_for_tier(Tier::One, usage);
        let t3 = usage_for_tier(Tier::Three, usage);
        assert!((t1.cost_usd - 0.80).abs() < 1e-9);
        assert!((t3.cost_usd - 15.0).abs() < 1e-9);
    }

    #[test]
    fn tier_model_lookup() {
        let models = TierModels {
            haiku: "haiku-model".into(),
            sonnet: "sonnet-model".into(),
            opus: "opus-model".into(),
        };
        assert_eq!(models.model_for(Tier::One), "haiku-model");
        assert_eq!(models.model_for(Tier::Three), "opus-model");
    }
}
