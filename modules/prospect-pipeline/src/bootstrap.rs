//! Wire the real backends into a `PipelineDeps` from configuration. Used by
//! the CLI and the webhook server.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use ai_client::AnthropicClient;
use firecrawl_client::FirecrawlClient;
use jina_client::JinaClient;
use notion_client::NotionClient;
use prospect_common::Config;
use prospect_store::{RunStore, SqlStore};
use salesforce_client::{SalesforceClient, SalesforceOptions};

use crate::llm::{AnthropicLlm, TierModels};
use crate::registry::{load_registry, NotionRegistry};
use crate::runner::PipelineDeps;
use crate::scrape::{CacheFetcher, FirecrawlFetcher, JinaFetcher, ScrapeChain};
use crate::traits::{CrmWriter, LeadRegistry, PageFetcher};
use crate::writeback::SalesforceCrm;

/// Build the shared dependency bundle. Any error here is a fatal setup
/// error: the caller should exit non-zero.
pub async fn build_deps(config: &Config) -> Result<(Arc<PipelineDeps>, Arc<dyn LeadRegistry>)> {
    let store: Arc<dyn RunStore> = Arc::new(
        SqlStore::connect(&config.store_database_url)
            .await
            .context("opening run store")?,
    );

    let mut adapters: Vec<Arc<dyn PageFetcher>> = Vec::new();
    let mut cache: Option<Arc<CacheFetcher>> = None;
    if !config.scrape_cache_dir.is_empty() {
        let fetcher = Arc::new(CacheFetcher::new(&config.scrape_cache_dir));
        cache = Some(fetcher.clone());
        adapters.push(fetcher);
    }
    let jina_key = Some(config.jina_api_key.as_str()).filter(|k| !k.is_empty());
    adapters.push(Arc::new(JinaFetcher::new(JinaClient::new(jina_key))));
    if !config.firecrawl_api_key.is_empty() {
        adapters.push(Arc::new(FirecrawlFetcher::new(FirecrawlClient::new(
            &config.firecrawl_api_key,
        ))));
    }
    let mut chain = ScrapeChain::new(adapters, &config.scrape_exclude_paths);
    if let Some(cache) = cache {
        chain = chain.with_cache(cache);
    }

    let llm = AnthropicLlm::new(
        AnthropicClient::new(&config.anthropic_api_key),
        TierModels {
            haiku: config.haiku_model.clone(),
            sonnet: config.sonnet_model.clone(),
            opus: config.opus_model.clone(),
        },
    );

    let registry: Arc<dyn LeadRegistry> = Arc::new(NotionRegistry::new(
        NotionClient::new(&config.notion_token),
        &config.notion_lead_db,
        &config.notion_question_db,
        &config.notion_field_db,
    ));

    let crm: Option<Arc<dyn CrmWriter>> = if !config.sf_client_id.is_empty() {
        Some(Arc::new(SalesforceCrm::new(SalesforceClient::new(
            SalesforceOptions {
                client_id: config.sf_client_id.clone(),
                key_path: config.sf_key_path.clone(),
                username: config.sf_username.clone(),
                login_url: config.sf_login_url.clone(),
                rate_limit: config.sf_rate_limit,
            },
        ))))
    } else {
        info!("No CRM credentials, write-back will skip Salesforce");
        None
    };

    let catalogs = load_registry(registry.as_ref()).await?;

    let deps = Arc::new(PipelineDeps {
        chain: Arc::new(chain),
        llm: Arc::new(llm),
        crm,
        lead_registry: Some(registry.clone()),
        catalogs,
        store,
        options: config.pipeline.clone(),
        cancelled: Arc::new(AtomicBool::new(false)),
    });

    Ok((deps, registry))
}
