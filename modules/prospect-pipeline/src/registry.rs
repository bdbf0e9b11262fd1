//! Registry loading: the question and field catalogs, plus the Notion
//! implementation of the lead-registry seam.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use notion_client::{NotionClient, Page, Property};
use prospect_common::{
    normalize_company_url, Company, DataType, FieldMapping, FieldRegistry, Question, Tier,
};

use crate::traits::LeadRegistry;

/// Immutable per-batch catalogs, shared read-only across workers.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub questions: Vec<Question>,
    pub fields: FieldRegistry,
}

/// Load both catalogs once. Any failure here is a fatal setup error for the
/// batch.
pub async fn load_registry(registry: &dyn LeadRegistry) -> Result<Arc<Registry>> {
    let questions = registry
        .load_questions()
        .await
        .context("loading question catalog")?;
    let fields = registry
        .load_fields()
        .await
        .context("loading field catalog")?;

    let active: Vec<Question> = questions.into_iter().filter(|q| q.active).collect();
    let field_registry = FieldRegistry::new(fields);

    info!(
        questions = active.len(),
        fields = field_registry.len(),
        required = field_registry.required_keys().len(),
        "Registry loaded"
    );
    Ok(Arc::new(Registry {
        questions: active,
        fields: field_registry,
    }))
}

// --- Notion-backed implementation ---

pub struct NotionRegistry {
    client: NotionClient,
    lead_db: String,
    question_db: String,
    field_db: String,
}

impl NotionRegistry {
    pub fn new(client: NotionClient, lead_db: &str, question_db: &str, field_db: &str) -> Self {
        Self {
            client,
            lead_db: lead_db.to_string(),
            question_db: question_db.to_string(),
            field_db: field_db.to_string(),
        }
    }

    fn company_from_page(page: &Page) -> Option<Company> {
        let raw_url = page.text("URL");
        let url = match normalize_company_url(&raw_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(page_id = page.id.as_str(), url = raw_url.as_str(), error = %e, "Skipping lead with bad URL");
                return None;
            }
        };
        let salesforce_id = Some(page.text("Salesforce ID")).filter(|s| !s.is_empty());
        let location = Some(page.text("Location")).filter(|s| !s.is_empty());
        Some(Company {
            lead_id: page.id.clone(),
            name: page.text("Name"),
            url,
            salesforce_id,
            location,
        })
    }

    fn question_from_page(page: &Page) -> Option<Question> {
        let tier = page
            .number("Tier")
            .and_then(|n| Tier::from_u8(n as u8))
            .unwrap_or(Tier::One);
        let field_key = page.text("Field Key");
        let text = page.text("Question");
        if text.is_empty() || field_key.is_empty() {
            warn!(page_id = page.id.as_str(), "Skipping malformed question row");
            return None;
        }
        let page_types: Vec<String> = page
            .text("Page Types")
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Some(Question {
            id: page.id.clone(),
            text,
            tier,
            field_key,
            page_types,
            instructions: Some(page.text("Instructions")).filter(|s| !s.is_empty()),
            output_format: Some(page.text("Output Format")).filter(|s| !s.is_empty()),
            active: page.text("Status") == "Active",
        })
    }

    fn field_from_page(page: &Page) -> Option<FieldMapping> {
        let key = page.text("Key");
        let destination_field = page.text("Destination Field");
        if key.is_empty() || destination_field.is_empty() {
            warn!(page_id = page.id.as_str(), "Skipping malformed field row");
            return None;
        }
        let data_type = match DataType::from_str(&page.text("Data Type")) {
            Ok(dt) => dt,
            Err(e) => {
                warn!(page_id = page.id.as_str(), error = e.as_str(), "Skipping field row");
                return None;
            }
        };
        Some(FieldMapping {
            key,
            destination_field,
            destination_object: Some(page.text("Destination Object"))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Account".to_string()),
            data_type,
            required: page.checkbox("Required"),
            max_length: page.number("Max Length").map(|n| n as usize),
            validation: Some(page.text("Validation")).filter(|s| !s.is_empty()),
            active: page.text("Status") != "Inactive",
        })
    }

    fn status_filter(status: &str) -> serde_json::Value {
        serde_json::json!({
            "property": "Status",
            "select": { "equals": status }
        })
    }
}

#[async_trait]
impl LeadRegistry for NotionRegistry {
    async fn fetch_queued(&self, limit: usize) -> Result<Vec<Company>> {
        let pages = self
            .client
            .query_all(&self.lead_db, Some(Self::status_filter("Queued")), limit)
            .await
            .context("querying queued leads")?;

        let companies: Vec<Company> = pages.iter().filter_map(Self::company_from_page).collect();
        info!(queued = companies.len(), "Fetched queued leads");
        Ok(companies)
    }

    async fn load_questions(&self) -> Result<Vec<Question>> {
        let pages = self
            .client
            .query_all(&self.question_db, None, 0)
            .await
            .context("querying question catalog")?;
        Ok(pages.iter().filter_map(Self::question_from_page).collect())
    }

    async fn load_fields(&self) -> Result<Vec<FieldMapping>> {
        let pages = self
            .client
            .query_all(&self.field_db, None, 0)
            .await
            .context("querying field catalog")?;
        Ok(pages.iter().filter_map(Self::field_from_page).collect())
    }

    async fn read_lead_fields(
        &self,
        page_id: &str,
        destinations: &[String],
    ) -> Result<HashMap<String, String>> {
        let page = self.client.get_page(page_id).await.context("reading lead page")?;
        Ok(destinations
            .iter()
            .map(|d| (d.clone(), page.text(d)))
            .filter(|(_, v)| !v.is_empty())
            .collect())
    }

    async fn write_lead(
        &self,
        page_id: &str,
        status: Option<&str>,
        fields: &HashMap<String, String>,
    ) -> Result<()> {
        let mut properties: HashMap<String, Property> = HashMap::new();
        if let Some(status) = status {
            properties.insert("Status".to_string(), Property::select(status));
        }
        for (destination, value) in fields {
            properties.insert(destination.clone(), Property::rich_text(value));
        }
        if properties.is_empty() {
            return Ok(());
        }
        self.client
            .update_page(page_id, properties)
            .await
            .context("updating lead page")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRegistry;
    use prospect_common::Tier;

    fn question(id: &str, active: bool) -> Question {
        Question {
            id: id.into(),
            text: "What industry?".into(),
            tier: Tier::One,
            field_key: "industry".into(),
            page_types: vec!["homepage".into()],
            instructions: None,
            output_format: None,
            active,
        }
    }

    #[tokio::test]
    async fn load_registry_drops_inactive_questions() {
        let mock = MockRegistry::new().with_questions(vec![
            question("q1", true),
            question("q2", false),
        ]);

        let registry = load_registry(&mock).await.unwrap();
        assert_eq!(registry.questions.len(), 1);
        assert_eq!(registry.questions[0].id, "q1");
    }
}
