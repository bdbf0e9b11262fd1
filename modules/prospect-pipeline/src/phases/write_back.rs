//! Write-back: push validated field values to the CRM and the lead
//! registry. At-most-once per destination: read, diff, write only changed
//! fields. Never deletes.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, warn};

use notion_client::NotionError;
use salesforce_client::SalesforceError;

use prospect_common::{
    DataType, ErrorCategory, FieldValue, PhaseName, Run, TokenUsage, ValidationStatus,
};

use crate::context::RunContext;
use crate::phases::{PhaseExecutor, PhaseOutcome};
use crate::runner::PipelineDeps;

pub const LEAD_STATUS_COMPLETED: &str = "Completed";
pub const LEAD_STATUS_FAILED: &str = "Failed";

/// Render a validated value as the JSON type the CRM column expects.
fn typed_value(data_type: DataType, value: &str) -> serde_json::Value {
    match data_type {
        DataType::Number | DataType::Currency => value
            .parse::<f64>()
            .map(|n| {
                serde_json::Number::from_f64(n)
                    .map(serde_json::Value::Number)
                    .unwrap_or_else(|| serde_json::Value::String(value.to_string()))
            })
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string())),
        DataType::Boolean => serde_json::Value::Bool(value == "true"),
        _ => serde_json::Value::String(value.to_string()),
    }
}

fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < 1e-9,
        _ => a == b,
    }
}

fn categorize(e: &anyhow::Error) -> ErrorCategory {
    if let Some(sf) = e.downcast_ref::<SalesforceError>() {
        if matches!(sf, SalesforceError::Auth(_)) || !sf.is_retryable() {
            return ErrorCategory::Permanent;
        }
        return ErrorCategory::Transient;
    }
    if let Some(n) = e.downcast_ref::<NotionError>() {
        return if n.is_retryable() {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Permanent
        };
    }
    ErrorCategory::Transient
}

fn usable(values: &[FieldValue]) -> impl Iterator<Item = &FieldValue> {
    values.iter().filter(|v| {
        matches!(
            v.status,
            ValidationStatus::Valid | ValidationStatus::Truncated
        )
    })
}

pub struct WriteBack;

impl WriteBack {
    async fn write_crm(deps: &PipelineDeps, run: &Run) -> anyhow::Result<usize> {
        let Some(ref crm) = deps.crm else {
            return Ok(0);
        };
        let Some(ref account_id) = run.company.salesforce_id else {
            return Ok(0);
        };

        let mut desired: HashMap<String, serde_json::Value> = HashMap::new();
        for value in usable(&run.field_values) {
            let Some(mapping) = deps.catalogs.fields.get(&value.field_key) else {
                continue;
            };
            if !mapping.destination_object.eq_ignore_ascii_case("account") {
                continue;
            }
            desired.insert(
                mapping.destination_field.clone(),
                typed_value(mapping.data_type, &value.value),
            );
        }

        if desired.is_empty() {
            return Ok(0);
        }

        let field_names: Vec<String> = desired.keys().cloned().collect();
        let existing = crm.read_fields(account_id, &field_names).await?;

        let changed: HashMap<String, serde_json::Value> = desired
            .into_iter()
            .filter(|(field, value)| {
                existing
                    .get(field)
                    .map(|current| !values_equal(current, value))
                    .unwrap_or(true)
            })
            .collect();

        let count = changed.len();
        if count > 0 {
            crm.update_fields(account_id, &changed).await?;
        }
        Ok(count)
    }

    async fn write_registry(deps: &PipelineDeps, run: &Run) -> anyhow::Result<usize> {
        let Some(ref registry) = deps.lead_registry else {
            return Ok(0);
        };
        if run.company.lead_id.is_empty() {
            return Ok(0);
        }

        let mut desired: HashMap<String, String> = HashMap::new();
        for value in usable(&run.field_values) {
            let Some(mapping) = deps.catalogs.fields.get(&value.field_key) else {
                continue;
            };
            desired.insert(mapping.destination_field.clone(), value.value.clone());
        }

        let mut destinations: Vec<String> = desired.keys().cloned().collect();
        destinations.push("Status".to_string());
        let existing = registry
            .read_lead_fields(&run.company.lead_id, &destinations)
            .await?;

        let changed: HashMap<String, String> = desired
            .into_iter()
            .filter(|(field, value)| existing.get(field) != Some(value))
            .collect();

        let status_current = existing.get("Status").map(String::as_str);
        let status = (status_current != Some(LEAD_STATUS_COMPLETED))
            .then_some(LEAD_STATUS_COMPLETED);

        let count = changed.len();
        if count > 0 || status.is_some() {
            registry
                .write_lead(&run.company.lead_id, status, &changed)
                .await?;
        }
        Ok(count)
    }
}

#[async_trait]
impl PhaseExecutor for WriteBack {
    fn name(&self) -> PhaseName {
        PhaseName::WriteBack
    }

    async fn execute(
        &self,
        deps: &PipelineDeps,
        ctx: &mut RunContext,
        run: &mut Run,
    ) -> PhaseOutcome {
        let has_crm = deps.crm.is_some() && run.company.salesforce_id.is_some();
        let has_registry = deps.lead_registry.is_some() && !run.company.lead_id.is_empty();
        if !has_crm && !has_registry {
            return PhaseOutcome::skipped();
        }

        let mut failures: Vec<(String, ErrorCategory)> = Vec::new();

        match Self::write_crm(deps, run).await {
            Ok(updated) => {
                info!(
                    company = run.company.url.as_str(),
                    updated, "CRM write-back complete"
                );
            }
            Err(e) => {
                warn!(company = run.company.url.as_str(), error = %e, "CRM write-back failed");
                failures.push((format!("crm: {e}"), categorize(&e)));
            }
        }

        match Self::write_registry(deps, run).await {
            Ok(updated) => {
                info!(
                    company = run.company.url.as_str(),
                    updated, "Registry write-back complete"
                );
            }
            Err(e) => {
                warn!(company = run.company.url.as_str(), error = %e, "Registry write-back failed");
                failures.push((format!("registry: {e}"), categorize(&e)));
            }
        }

        if !failures.is_empty() {
            ctx.warnings
                .extend(failures.iter().map(|(m, _)| m.clone()));
            let category = if failures
                .iter()
                .any(|(_, c)| *c == ErrorCategory::Permanent)
            {
                ErrorCategory::Permanent
            } else {
                ErrorCategory::Transient
            };
            let message = failures
                .into_iter()
                .map(|(m, _)| m)
                .collect::<Vec<_>>()
                .join("; ");
            return PhaseOutcome::failed(message, category, TokenUsage::default());
        }

        PhaseOutcome::success(TokenUsage::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_match_column_types() {
        assert_eq!(
            typed_value(DataType::Number, "120"),
            serde_json::json!(120.0)
        );
        assert_eq!(typed_value(DataType::Boolean, "true"), serde_json::json!(true));
        assert_eq!(
            typed_value(DataType::String, "widgets"),
            serde_json::json!("widgets")
        );
    }

    #[test]
    fn numeric_equality_tolerates_representation() {
        assert!(values_equal(
            &serde_json::json!(120),
            &serde_json::json!(120.0)
        ));
        assert!(!values_equal(
            &serde_json::json!(120),
            &serde_json::json!(121)
        ));
    }
}
