//! Validation: coerce each final answer to its field's declared data type,
//! enforce max length and regex, and materialize required-but-missing
//! fields.

use async_trait::async_trait;
use tracing::warn;

use prospect_common::{
    DataType, ErrorCategory, ExtractionAnswer, FieldMapping, FieldRegistry, FieldValue,
    PhaseName, Run, TokenUsage, ValidationStatus,
};

use crate::context::RunContext;
use crate::phases::{PhaseExecutor, PhaseOutcome};
use crate::runner::PipelineDeps;

/// Coerce a raw answer to the declared data type. Err carries the reason.
pub fn coerce(data_type: DataType, raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    match data_type {
        DataType::String => Ok(trimmed.to_string()),
        DataType::Number => parse_number(trimmed)
            .map(format_number)
            .ok_or_else(|| format!("not a number: {trimmed}")),
        DataType::Currency => parse_currency(trimmed)
            .map(format_number)
            .ok_or_else(|| format!("not a currency amount: {trimmed}")),
        DataType::Boolean => match trimmed.to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok("true".to_string()),
            "false" | "no" | "n" | "0" => Ok("false".to_string()),
            _ => Err(format!("not a boolean: {trimmed}")),
        },
        DataType::Phone => normalize_phone(trimmed),
        DataType::List => {
            let items: Vec<&str> = trimmed
                .split([';', ',', '\n'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            Ok(items.join("; "))
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && *c != ' ').collect();
    // First numeric token, so "120 employees" still parses.
    let token: String = cleaned
        .chars()
        .skip_while(|c| !c.is_ascii_digit() && *c != '-' && *c != '+')
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    token.parse().ok()
}

fn parse_currency(raw: &str) -> Option<f64> {
    let lowered = raw.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();
    let (digits, multiplier) = if let Some(rest) = cleaned.strip_suffix("billion") {
        (rest, 1e9)
    } else if let Some(rest) = cleaned.strip_suffix("million") {
        (rest, 1e6)
    } else if let Some(rest) = cleaned.strip_suffix('b') {
        (rest, 1e9)
    } else if let Some(rest) = cleaned.strip_suffix('m') {
        (rest, 1e6)
    } else if let Some(rest) = cleaned.strip_suffix('k') {
        (rest, 1e3)
    } else {
        (cleaned.as_str(), 1.0)
    };
    digits.trim().parse::<f64>().ok().map(|n| n * multiplier)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn normalize_phone(raw: &str) -> Result<String, String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 7 {
        return Err(format!("not a phone number: {raw}"));
    }
    if raw.trim().starts_with('+') {
        return Ok(format!("+{digits}"));
    }
    match digits.len() {
        10 => Ok(format!("+1{digits}")),
        11 if digits.starts_with('1') => Ok(format!("+{digits}")),
        _ => Ok(digits),
    }
}

fn truncate_value(value: &str, max_length: usize) -> String {
    value.chars().take(max_length).collect()
}

/// Validate one answer against its field mapping.
pub fn validate_one(answer: &ExtractionAnswer, mapping: &FieldMapping) -> Option<FieldValue> {
    let coerced = match coerce(mapping.data_type, &answer.value) {
        Ok(value) => value,
        Err(reason) => {
            warn!(field = mapping.key.as_str(), reason = reason.as_str(), "Value rejected");
            return Some(FieldValue {
                field_key: mapping.key.clone(),
                value: answer.value.trim().to_string(),
                status: ValidationStatus::Rejected,
                confidence: answer.confidence,
            });
        }
    };

    if coerced.is_empty() {
        if mapping.required {
            return Some(FieldValue {
                field_key: mapping.key.clone(),
                value: String::new(),
                status: ValidationStatus::Missing,
                confidence: 0.0,
            });
        }
        // Empty optional values are dropped.
        return None;
    }

    let (value, mut status) = match mapping.max_length {
        Some(max) if coerced.chars().count() > max => match mapping.data_type {
            DataType::String | DataType::List => {
                (truncate_value(&coerced, max), ValidationStatus::Truncated)
            }
            _ => (coerced, ValidationStatus::Rejected),
        },
        _ => (coerced, ValidationStatus::Valid),
    };

    if status != ValidationStatus::Rejected {
        if let Some(ref pattern) = mapping.validation {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(&value) {
                        status = ValidationStatus::Rejected;
                    }
                }
                Err(e) => {
                    warn!(field = mapping.key.as_str(), error = %e, "Invalid validation regex, skipping check");
                }
            }
        }
    }

    Some(FieldValue {
        field_key: mapping.key.clone(),
        value,
        status,
        confidence: answer.confidence,
    })
}

/// Validate all final answers; required fields without any answer become
/// `missing` rows.
pub fn validate_answers(
    answers: &[&ExtractionAnswer],
    fields: &FieldRegistry,
) -> (Vec<FieldValue>, Vec<String>) {
    let mut values: Vec<FieldValue> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for answer in answers {
        let Some(mapping) = fields.get(&answer.field_key) else {
            warnings.push(format!(
                "answer for unknown field key {} dropped",
                answer.field_key
            ));
            continue;
        };
        if let Some(value) = validate_one(answer, mapping) {
            values.push(value);
        }
    }

    for key in fields.required_keys() {
        if !values.iter().any(|v| &v.field_key == key) {
            values.push(FieldValue {
                field_key: key.clone(),
                value: String::new(),
                status: ValidationStatus::Missing,
                confidence: 0.0,
            });
        }
    }

    (values, warnings)
}

pub struct Validation;

#[async_trait]
impl PhaseExecutor for Validation {
    fn name(&self) -> PhaseName {
        PhaseName::Validation
    }

    async fn execute(
        &self,
        deps: &PipelineDeps,
        ctx: &mut RunContext,
        run: &mut Run,
    ) -> PhaseOutcome {
        let finals: Vec<&ExtractionAnswer> = run.final_answers().collect();
        let (values, warnings) = validate_answers(&finals, &deps.catalogs.fields);
        ctx.warnings.extend(warnings);
        run.field_values = values;

        let required = deps.catalogs.fields.required_keys();
        if !required.is_empty() {
            let any_usable = run.field_values.iter().any(|v| {
                required.contains(&v.field_key)
                    && matches!(
                        v.status,
                        ValidationStatus::Valid | ValidationStatus::Truncated
                    )
            });
            if !any_usable {
                return PhaseOutcome::failed(
                    "validation rejected all required fields",
                    ErrorCategory::Permanent,
                    TokenUsage::default(),
                );
            }
        }

        PhaseOutcome::success(TokenUsage::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospect_common::{Tier, TokenUsage};

    fn answer(field_key: &str, value: &str, confidence: f64) -> ExtractionAnswer {
        ExtractionAnswer {
            question_id: format!("q-{field_key}"),
            field_key: field_key.into(),
            value: value.into(),
            confidence,
            tier: Tier::One,
            source_urls: vec![],
            usage: TokenUsage::default(),
            superseded: false,
        }
    }

    fn mapping(key: &str, data_type: DataType) -> FieldMapping {
        FieldMapping {
            key: key.into(),
            destination_field: key.into(),
            destination_object: "Account".into(),
            data_type,
            required: false,
            max_length: None,
            validation: None,
            active: true,
        }
    }

    #[test]
    fn number_coercion_extracts_first_token() {
        assert_eq!(coerce(DataType::Number, "120 employees").unwrap(), "120");
        assert_eq!(coerce(DataType::Number, "1,200").unwrap(), "1200");
        assert!(coerce(DataType::Number, "many").is_err());
    }

    #[test]
    fn currency_coercion_handles_suffixes() {
        assert_eq!(coerce(DataType::Currency, "$1.2M").unwrap(), "1200000");
        assert_eq!(coerce(DataType::Currency, "$5,000").unwrap(), "5000");
        assert_eq!(
            coerce(DataType::Currency, "3 million").unwrap(),
            "3000000"
        );
    }

    #[test]
    fn boolean_coercion() {
        assert_eq!(coerce(DataType::Boolean, "Yes").unwrap(), "true");
        assert_eq!(coerce(DataType::Boolean, "no").unwrap(), "false");
        assert!(coerce(DataType::Boolean, "maybe").is_err());
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(
            coerce(DataType::Phone, "(612) 555-0199").unwrap(),
            "+16125550199"
        );
        assert_eq!(
            coerce(DataType::Phone, "+44 20 7946 0958").unwrap(),
            "+442079460958"
        );
        assert!(coerce(DataType::Phone, "call us").is_err());
    }

    #[test]
    fn list_coercion_normalizes_separators() {
        assert_eq!(
            coerce(DataType::List, "plumbing, heating,\ncooling").unwrap(),
            "plumbing; heating; cooling"
        );
    }

    #[test]
    fn over_length_string_truncates() {
        let mut m = mapping("industry", DataType::String);
        m.max_length = Some(5);
        let fv = validate_one(&answer("industry", "industrial tooling", 0.9), &m).unwrap();
        assert_eq!(fv.status, ValidationStatus::Truncated);
        assert_eq!(fv.value, "indus");
        assert_eq!(fv.value.chars().count(), 5);
    }

    #[test]
    fn over_length_number_rejects() {
        let mut m = mapping("employee_count", DataType::Number);
        m.max_length = Some(2);
        let fv = validate_one(&answer("employee_count", "12345", 0.9), &m).unwrap();
        assert_eq!(fv.status, ValidationStatus::Rejected);
    }

    #[test]
    fn regex_mismatch_rejects() {
        let mut m = mapping("website", DataType::String);
        m.validation = Some(r"^https?://".into());
        let fv = validate_one(&answer("website", "acme.com", 0.9), &m).unwrap();
        assert_eq!(fv.status, ValidationStatus::Rejected);
    }

    #[test]
    fn empty_optional_dropped_empty_required_missing() {
        let m = mapping("industry", DataType::String);
        assert!(validate_one(&answer("industry", "", 0.0), &m).is_none());

        let mut required = mapping("industry", DataType::String);
        required.required = true;
        let fv = validate_one(&answer("industry", "", 0.0), &required).unwrap();
        assert_eq!(fv.status, ValidationStatus::Missing);
    }

    #[test]
    fn required_field_without_answer_materializes_missing() {
        let mut industry = mapping("industry", DataType::String);
        industry.required = true;
        let registry = FieldRegistry::new(vec![industry]);

        let (values, _) = validate_answers(&[], &registry);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].field_key, "industry");
        assert_eq!(values[0].status, ValidationStatus::Missing);
    }

    #[test]
    fn unknown_field_key_dropped_with_warning() {
        let registry = FieldRegistry::new(vec![mapping("industry", DataType::String)]);
        let a = answer("mystery", "value", 0.9);
        let (values, warnings) = validate_answers(&[&a], &registry);
        assert!(values.is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
