use std::env;

/// Gate for tier-3 (Opus) extraction. The per-company cost cap always wins:
/// once accumulated cost crosses the cap no further tier starts, even with
/// `always`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier3Gate {
    Never,
    OnLowConfidence,
    Always,
}

impl std::str::FromStr for Tier3Gate {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "on_low_confidence" => Ok(Self::OnLowConfidence),
            "always" => Ok(Self::Always),
            other => Err(format!("unknown tier3 gate: {other}")),
        }
    }
}

/// Confidence thresholds and cost controls for the tiered extractor.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Answers below this confidence are re-attempted at the next tier.
    pub escalation_threshold: f64,
    /// Answers at or above this confidence never escalate, even if allowed.
    pub skip_confidence_threshold: f64,
    /// Complete runs with aggregate confidence below this are flagged low-quality.
    pub quality_score_threshold: f64,
    pub tier3_gate: Tier3Gate,
    /// Per-company USD cost cap. 0 = unlimited.
    pub max_cost_per_company: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            escalation_threshold: 0.4,
            skip_confidence_threshold: 0.8,
            quality_score_threshold: 0.5,
            tier3_gate: Tier3Gate::OnLowConfidence,
            max_cost_per_company: 0.0,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Lead registry (Notion)
    pub notion_token: String,
    pub notion_lead_db: String,
    pub notion_question_db: String,
    pub notion_field_db: String,

    // LLM provider
    pub anthropic_api_key: String,
    pub haiku_model: String,
    pub sonnet_model: String,
    pub opus_model: String,

    // Scraping
    pub jina_api_key: String,
    pub firecrawl_api_key: String,
    /// Glob-like path patterns excluded from scraping (e.g. "/blog/*").
    pub scrape_exclude_paths: Vec<String>,
    /// Local scrape cache directory. Empty disables the cache adapter.
    pub scrape_cache_dir: String,

    // CRM (Salesforce)
    pub sf_client_id: String,
    pub sf_key_path: String,
    pub sf_username: String,
    pub sf_login_url: String,
    pub sf_rate_limit: u32,

    // Batch
    pub max_concurrent_companies: usize,
    pub batch_limit: usize,

    // Pipeline thresholds
    pub pipeline: PipelineOptions,

    // Run store
    pub store_database_url: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration for the enrichment pipeline (`run` / `batch`).
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            notion_token: required_env("NOTION_TOKEN"),
            notion_lead_db: required_env("NOTION_LEAD_DB"),
            notion_question_db: required_env("NOTION_QUESTION_DB"),
            notion_field_db: required_env("NOTION_FIELD_DB"),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            haiku_model: env::var("HAIKU_MODEL")
                .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string()),
            sonnet_model: env::var("SONNET_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            opus_model: env::var("OPUS_MODEL")
                .unwrap_or_else(|_| "claude-opus-4-20250514".to_string()),
            jina_api_key: env::var("JINA_API_KEY").unwrap_or_default(),
            firecrawl_api_key: env::var("FIRECRAWL_API_KEY").unwrap_or_default(),
            scrape_exclude_paths: list_env("SCRAPE_EXCLUDE_PATHS"),
            scrape_cache_dir: env::var("SCRAPE_CACHE_DIR")
                .unwrap_or_else(|_| ".scrape-cache".to_string()),
            sf_client_id: env::var("SF_CLIENT_ID").unwrap_or_default(),
            sf_key_path: env::var("SF_KEY_PATH").unwrap_or_default(),
            sf_username: env::var("SF_USERNAME").unwrap_or_default(),
            sf_login_url: env::var("SF_LOGIN_URL")
                .unwrap_or_else(|_| "https://login.salesforce.com".to_string()),
            sf_rate_limit: parse_env("SF_RATE_LIMIT", 5),
            max_concurrent_companies: parse_env("MAX_CONCURRENT_COMPANIES", 5),
            batch_limit: parse_env("BATCH_LIMIT", 50),
            pipeline: PipelineOptions {
                escalation_threshold: parse_env("ESCALATION_THRESHOLD", 0.4),
                skip_confidence_threshold: parse_env("SKIP_CONFIDENCE_THRESHOLD", 0.8),
                quality_score_threshold: parse_env("QUALITY_SCORE_THRESHOLD", 0.5),
                tier3_gate: env::var("TIER3_GATE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(Tier3Gate::OnLowConfidence),
                max_cost_per_company: parse_env("MAX_COST_PER_COMPANY", 0.0),
            },
            store_database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://prospect.db".to_string()),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: parse_env("WEB_PORT", 3000),
        }
    }

    /// Log the presence/size of each sensitive var for debugging, never values.
    pub fn log_redacted(&self) {
        let vars = [
            ("NOTION_TOKEN", &self.notion_token),
            ("ANTHROPIC_API_KEY", &self.anthropic_api_key),
            ("JINA_API_KEY", &self.jina_api_key),
            ("FIRECRAWL_API_KEY", &self.firecrawl_api_key),
            ("SF_CLIENT_ID", &self.sf_client_id),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn list_env(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
