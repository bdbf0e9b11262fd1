//! Salesforce-backed CRM writer.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use salesforce_client::SalesforceClient;

use crate::traits::CrmWriter;

pub struct SalesforceCrm {
    client: SalesforceClient,
}

impl SalesforceCrm {
    pub fn new(client: SalesforceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CrmWriter for SalesforceCrm {
    async fn read_fields(
        &self,
        account_id: &str,
        fields: &[String],
    ) -> Result<HashMap<String, serde_json::Value>> {
        // Preserve the typed error for phase-level categorization.
        self.client
            .get_account(account_id, fields)
            .await
            .map_err(anyhow::Error::new)
    }

    async fn update_fields(
        &self,
        account_id: &str,
        fields: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.client
            .update_account(account_id, fields)
            .await
            .map_err(anyhow::Error::new)
    }
}
