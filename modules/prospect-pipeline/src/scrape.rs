//! Scraper fallback chain: local cache → Jina → Firecrawl.
//!
//! First adapter returning non-empty text wins. Retryable failures cascade
//! to the next adapter and are kept as warnings; a non-retryable failure
//! aborts the chain.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use glob::Pattern;
use thiserror::Error;
use tracing::{debug, info, warn};

use firecrawl_client::FirecrawlClient;
use jina_client::JinaClient;

use crate::traits::{FetchError, PageFetcher};

// --- Chain output ---

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub text: String,
    pub used_scraper: String,
    /// True when the URL path matched an exclusion pattern.
    pub skipped: bool,
    /// Adapter failures that the chain recovered from.
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ScrapeChainError {
    #[error("all scrapers failed for {url}: {reasons}")]
    Exhausted { url: String, reasons: String },

    #[error("{scraper} failed for {url}: {message}")]
    Aborted {
        scraper: String,
        url: String,
        message: String,
    },
}

// --- Chain ---

pub struct ScrapeChain {
    adapters: Vec<Arc<dyn PageFetcher>>,
    excluded: Vec<Pattern>,
    cache: Option<Arc<CacheFetcher>>,
}

impl ScrapeChain {
    pub fn new(adapters: Vec<Arc<dyn PageFetcher>>, excluded_paths: &[String]) -> Self {
        let excluded = excluded_paths
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = p.as_str(), error = %e, "Ignoring invalid exclusion pattern");
                    None
                }
            })
            .collect();
        Self {
            adapters,
            excluded,
            cache: None,
        }
    }

    /// Cache successful fetches to `cache` (which should also be the first
    /// adapter in the chain).
    pub fn with_cache(mut self, cache: Arc<CacheFetcher>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn is_excluded(&self, url: &str) -> bool {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        self.excluded.iter().any(|p| p.matches(&path))
    }

    /// Fetch one URL through the chain. Safe under concurrent calls.
    pub async fn fetch(&self, url: &str) -> Result<FetchOutcome, ScrapeChainError> {
        if self.is_excluded(url) {
            debug!(url, "URL path excluded, skipping");
            return Ok(FetchOutcome {
                skipped: true,
                ..Default::default()
            });
        }

        let mut warnings = Vec::new();
        for adapter in &self.adapters {
            match adapter.fetch(url).await {
                Ok(text) if !text.trim().is_empty() => {
                    info!(url, scraper = adapter.name(), bytes = text.len(), "Scraped");
                    if adapter.name() != CACHE_SCRAPER_NAME {
                        if let Some(ref cache) = self.cache {
                            cache.store(url, &text).await;
                        }
                    }
                    return Ok(FetchOutcome {
                        text,
                        used_scraper: adapter.name().to_string(),
                        skipped: false,
                        warnings,
                    });
                }
                Ok(_) => {
                    debug!(url, scraper = adapter.name(), "No content, trying next");
                }
                Err(e) if e.retryable => {
                    warn!(url, scraper = adapter.name(), error = %e, "Scraper failed, trying next");
                    warnings.push(format!("{}: {}", adapter.name(), e.message));
                }
                Err(e) => {
                    return Err(ScrapeChainError::Aborted {
                        scraper: adapter.name().to_string(),
                        url: url.to_string(),
                        message: e.message,
                    });
                }
            }
        }

        if warnings.is_empty() {
            // Every adapter saw the page but none had content.
            Ok(FetchOutcome::default())
        } else {
            Err(ScrapeChainError::Exhausted {
                url: url.to_string(),
                reasons: warnings.join("; "),
            })
        }
    }
}

// --- Local cache adapter ---

pub const CACHE_SCRAPER_NAME: &str = "cache";

/// Filesystem cache of previously scraped pages. A miss is "no content",
/// never an error.
pub struct CacheFetcher {
    dir: PathBuf,
}

impl CacheFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let key: String = url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{key}.md"))
    }

    pub async fn store(&self, url: &str, text: &str) {
        let path = self.cache_path(url);
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(error = %e, "Cannot create scrape cache dir");
            return;
        }
        if let Err(e) = tokio::fs::write(&path, text).await {
            warn!(url, error = %e, "Cache write failed");
        }
    }
}

#[async_trait]
impl PageFetcher for CacheFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        match tokio::fs::read_to_string(self.cache_path(url)).await {
            Ok(text) => {
                debug!(url, "Scrape cache hit");
                Ok(text)
            }
            Err(_) => Ok(String::new()),
        }
    }

    fn name(&self) -> &str {
        CACHE_SCRAPER_NAME
    }
}

// --- Jina adapter ---

pub struct JinaFetcher {
    client: JinaClient,
}

impl JinaFetcher {
    pub fn new(client: JinaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for JinaFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.client.read(url).await.map_err(|e| match e {
            jina_client::JinaError::Api { status, message } => {
                FetchError::from_status(status, format!("jina {status}: {message}"))
            }
            jina_client::JinaError::Network(message) => FetchError::retryable(message),
        })
    }

    fn name(&self) -> &str {
        "jina"
    }
}

// --- Firecrawl adapter ---

pub struct FirecrawlFetcher {
    client: FirecrawlClient,
}

impl FirecrawlFetcher {
    pub fn new(client: FirecrawlClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for FirecrawlFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.client.scrape(url).await.map_err(|e| match e {
            firecrawl_client::FirecrawlError::Api { status, message } => {
                FetchError::from_status(status, format!("firecrawl {status}: {message}"))
            }
            firecrawl_client::FirecrawlError::Network(message) => FetchError::retryable(message),
            firecrawl_client::FirecrawlError::Parse(message) => FetchError::permanent(message),
        })
    }

    fn name(&self) -> &str {
        "firecrawl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubFetcher;

    fn chain(adapters: Vec<Arc<dyn PageFetcher>>) -> ScrapeChain {
        ScrapeChain::new(adapters, &[])
    }

    #[tokio::test]
    async fn first_adapter_with_text_wins() {
        let chain = chain(vec![
            Arc::new(StubFetcher::empty("cache")),
            Arc::new(StubFetcher::text("jina", "page body")),
            Arc::new(StubFetcher::text("firecrawl", "should not reach")),
        ]);

        let out = chain.fetch("https://acme.com").await.unwrap();
        assert_eq!(out.text, "page body");
        assert_eq!(out.used_scraper, "jina");
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn retryable_failure_falls_through_with_warning() {
        let chain = chain(vec![
            Arc::new(StubFetcher::empty("cache")),
            Arc::new(StubFetcher::fail("jina", 429)),
            Arc::new(StubFetcher::text("firecrawl", "rescued")),
        ]);

        let out = chain.fetch("https://acme.com").await.unwrap();
        assert_eq!(out.used_scraper, "firecrawl");
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("jina"));
    }

    #[tokio::test]
    async fn exhausted_with_retryable_errors_is_an_error() {
        let chain = chain(vec![
            Arc::new(StubFetcher::fail("jina", 503)),
            Arc::new(StubFetcher::fail("firecrawl", 502)),
        ]);

        let err = chain.fetch("https://acme.com").await.unwrap_err();
        assert!(matches!(err, ScrapeChainError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn non_retryable_failure_aborts() {
        let chain = chain(vec![
            Arc::new(StubFetcher::fail("jina", 403)),
            Arc::new(StubFetcher::text("firecrawl", "never reached")),
        ]);

        let err = chain.fetch("https://acme.com").await.unwrap_err();
        assert!(matches!(err, ScrapeChainError::Aborted { scraper, .. } if scraper == "jina"));
    }

    #[tokio::test]
    async fn all_empty_is_no_content_not_failure() {
        let chain = chain(vec![
            Arc::new(StubFetcher::empty("cache")),
            Arc::new(StubFetcher::empty("jina")),
        ]);

        let out = chain.fetch("https://acme.com/nothing").await.unwrap();
        assert!(out.text.is_empty());
        assert!(!out.skipped);
    }

    #[tokio::test]
    async fn excluded_path_is_skipped() {
        let chain = ScrapeChain::new(
            vec![Arc::new(StubFetcher::text("jina", "body"))],
            &["/blog/*".to_string()],
        );

        let out = chain.fetch("https://acme.com/blog/post-1").await.unwrap();
        assert!(out.skipped);
        assert!(out.text.is_empty());

        let out = chain.fetch("https://acme.com/about").await.unwrap();
        assert!(!out.skipped);
        assert_eq!(out.text, "body");
    }
}
