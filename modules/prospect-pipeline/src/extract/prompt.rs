//! Prompt assembly for tiered extraction.

use std::collections::BTreeMap;

use prospect_common::{Question, Tier};

use crate::traits::QuestionPrompt;

const SYSTEM_PROMPT: &str = "You are a sales research analyst extracting facts about a company \
from its website. Answer with a single JSON object: \
{\"value\": <answer>, \"confidence\": <0..1>}. \
Use an empty value and confidence 0 when the pages do not contain the answer. \
Never guess.";

/// Per-tier input budget in tokens. Cheaper tiers see less context.
fn input_budget_tokens(tier: Tier) -> usize {
    match tier {
        Tier::One => 8_000,
        Tier::Two => 24_000,
        Tier::Three => 48_000,
    }
}

/// Rough chars-per-token estimate used for budgeting.
const CHARS_PER_TOKEN: usize = 4;

fn take_chars(text: &str, max_chars: usize) -> &str {
    if text.chars().count() <= max_chars {
        return text;
    }
    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}

/// Join the page-type-relevant text slices for one question, respecting the
/// tier's input budget. Page types are consumed in the question's declared
/// order; the homepage backs up questions with no matching page.
pub fn context_for(
    question: &Question,
    text_by_type: &BTreeMap<String, String>,
    tier: Tier,
) -> String {
    let mut budget = input_budget_tokens(tier) * CHARS_PER_TOKEN;
    let mut sections: Vec<String> = Vec::new();

    let homepage = "homepage".to_string();
    let mut wanted: Vec<&String> = question.page_types.iter().collect();
    if wanted.is_empty() {
        wanted.push(&homepage);
    }

    for page_type in wanted {
        if budget == 0 {
            break;
        }
        let Some(text) = text_by_type.get(page_type) else {
            continue;
        };
        let slice = take_chars(text, budget);
        if slice.is_empty() {
            continue;
        }
        budget -= slice.chars().count().min(budget);
        sections.push(format!("=== {page_type} ===\n{slice}"));
    }

    // Nothing matched the hints; fall back to whatever was scraped.
    if sections.is_empty() {
        for (page_type, text) in text_by_type {
            if budget == 0 {
                break;
            }
            let slice = take_chars(text, budget);
            budget -= slice.chars().count().min(budget);
            sections.push(format!("=== {page_type} ===\n{slice}"));
        }
    }

    sections.join("\n\n")
}

pub fn build_prompt(
    question: &Question,
    text_by_type: &BTreeMap<String, String>,
    tier: Tier,
) -> QuestionPrompt {
    let context = context_for(question, text_by_type, tier);

    let mut user = format!("Company pages:\n\n{context}\n\nQuestion: {}", question.text);
    if let Some(ref instructions) = question.instructions {
        user.push_str(&format!("\nInstructions: {instructions}"));
    }
    if let Some(ref format) = question.output_format {
        user.push_str(&format!("\nExpected value format: {format}"));
    }

    QuestionPrompt {
        question_id: question.id.clone(),
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospect_common::Tier;

    fn question(page_types: &[&str]) -> Question {
        Question {
            id: "q1".into(),
            text: "What industry is this company in?".into(),
            tier: Tier::One,
            field_key: "industry".into(),
            page_types: page_types.iter().map(|s| s.to_string()).collect(),
            instructions: None,
            output_format: None,
            active: true,
        }
    }

    fn pages(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn context_follows_declared_page_type_order() {
        let text = pages(&[("homepage", "home"), ("about", "about us")]);
        let ctx = context_for(&question(&["about", "homepage"]), &text, Tier::One);
        let about_pos = ctx.find("about us").unwrap();
        let home_pos = ctx.find("home").unwrap();
        assert!(about_pos < home_pos);
    }

    #[test]
    fn no_hints_defaults_to_homepage() {
        let text = pages(&[("homepage", "home text"), ("team", "team text")]);
        let ctx = context_for(&question(&[]), &text, Tier::One);
        assert!(ctx.contains("home text"));
        assert!(!ctx.contains("team text"));
    }

    #[test]
    fn missing_hint_falls_back_to_all_pages() {
        let text = pages(&[("services", "services text")]);
        let ctx = context_for(&question(&["about"]), &text, Tier::One);
        assert!(ctx.contains("services text"));
    }

    #[test]
    fn budget_caps_context_size() {
        let long = "x".repeat(100_000);
        let text = pages(&[("homepage", long.as_str())]);
        let ctx = context_for(&question(&["homepage"]), &text, Tier::One);
        assert!(ctx.chars().count() <= 8_000 * 4 + 64);
    }

    #[test]
    fn prompt_carries_instructions_and_format() {
        let mut q = question(&["homepage"]);
        q.instructions = Some("Prefer the official name.".into());
        q.output_format = Some("a short phrase".into());
        let text = pages(&[("homepage", "Acme builds widgets.")]);

        let prompt = build_prompt(&q, &text, Tier::One);
        assert!(prompt.user.contains("Prefer the official name."));
        assert!(prompt.user.contains("a short phrase"));
        assert!(prompt.system.contains("confidence"));
    }
}
