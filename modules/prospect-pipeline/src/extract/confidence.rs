//! Answer parsing and confidence estimation.
//!
//! Models are asked for `{"value": ..., "confidence": ...}`; when the
//! self-reported confidence is missing or unparseable we fall back to a
//! heuristic over the answer text and the prior tier's answer.

/// Phrases that mean the model found nothing.
const UNKNOWN_MARKERS: &[&str] = &[
    "unknown",
    "not found",
    "n/a",
    "no information",
    "unable to determine",
    "cannot determine",
];

#[derive(Debug, Clone, Default)]
pub struct ParsedAnswer {
    pub value: String,
    pub self_reported: Option<f64>,
}

/// Parse a raw model reply. Accepts a JSON object (optionally fenced),
/// falling back to the trimmed text as the value.
pub fn parse_answer(raw: &str) -> ParsedAnswer {
    let trimmed = strip_fences(raw.trim());

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(obj) = json.as_object() {
            let value = obj
                .get("value")
                .or_else(|| obj.get("answer"))
                .map(json_to_text)
                .unwrap_or_default();
            let self_reported = obj.get("confidence").and_then(|c| c.as_f64());
            return ParsedAnswer {
                value,
                self_reported,
            };
        }
    }

    ParsedAnswer {
        value: trimmed.to_string(),
        self_reported: None,
    }
}

fn json_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(json_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

fn strip_fences(raw: &str) -> &str {
    let raw = raw
        .strip_prefix("```json")
        .or_else(|| raw.strip_prefix("```"))
        .unwrap_or(raw);
    raw.strip_suffix("```").unwrap_or(raw).trim()
}

/// Is the value an explicit "nothing found" marker?
pub fn is_unknown_marker(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    UNKNOWN_MARKERS.iter().any(|m| lowered == *m || lowered.starts_with(&format!("{m}.")))
}

/// Heuristic confidence when the model didn't self-report: empty and
/// "unknown" answers score near zero, agreement with the prior tier's
/// answer raises the score.
pub fn heuristic_confidence(value: &str, prior: Option<&str>) -> f64 {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if is_unknown_marker(trimmed) {
        return 0.1;
    }

    let mut confidence: f64 = if trimmed.chars().count() < 3 { 0.3 } else { 0.6 };

    if let Some(prior) = prior {
        let prior = prior.trim();
        if !prior.is_empty() && prior.eq_ignore_ascii_case(trimmed) {
            confidence += 0.25;
        }
    }

    confidence.min(0.95)
}

/// Final confidence for an answer: self-reported when present (clamped),
/// heuristic otherwise.
pub fn confidence_for(parsed: &ParsedAnswer, prior: Option<&str>) -> f64 {
    match parsed.self_reported {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => heuristic_confidence(&parsed.value, prior),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_object() {
        let parsed = parse_answer(r#"{"value": "widgets", "confidence": 0.9}"#);
        assert_eq!(parsed.value, "widgets");
        assert_eq!(parsed.self_reported, Some(0.9));
    }

    #[test]
    fn parses_fenced_json() {
        let parsed = parse_answer("```json\n{\"value\": \"120\", \"confidence\": 0.8}\n```");
        assert_eq!(parsed.value, "120");
        assert_eq!(parsed.self_reported, Some(0.8));
    }

    #[test]
    fn numeric_value_becomes_text() {
        let parsed = parse_answer(r#"{"value": 120, "confidence": 0.7}"#);
        assert_eq!(parsed.value, "120");
    }

    #[test]
    fn plain_text_fallback() {
        let parsed = parse_answer("Industrial tooling");
        assert_eq!(parsed.value, "Industrial tooling");
        assert!(parsed.self_reported.is_none());
    }

    #[test]
    fn empty_answer_scores_zero() {
        assert_eq!(heuristic_confidence("", None), 0.0);
        assert_eq!(heuristic_confidence("  ", None), 0.0);
    }

    #[test]
    fn unknown_marker_scores_low() {
        assert_eq!(heuristic_confidence("unknown", None), 0.1);
        assert_eq!(heuristic_confidence("Not Found", None), 0.1);
    }

    #[test]
    fn prior_agreement_raises_confidence() {
        let alone = heuristic_confidence("widgets", None);
        let agreed = heuristic_confidence("widgets", Some("Widgets"));
        assert!(agreed > alone);
    }

    #[test]
    fn self_reported_wins_and_clamps() {
        let parsed = ParsedAnswer {
            value: "x".into(),
            self_reported: Some(1.7),
        };
        assert_eq!(confidence_for(&parsed, None), 1.0);
    }
}
