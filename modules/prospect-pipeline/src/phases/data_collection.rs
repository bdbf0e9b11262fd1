//! Data collection: fetch the homepage plus the URLs derived from the
//! question catalog's page-type hints, through the scrape chain.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tracing::{info, warn};

use prospect_common::{ErrorCategory, PhaseName, Run, TokenUsage};

use crate::context::{RunContext, ScrapedPage};
use crate::phases::{PhaseExecutor, PhaseOutcome};
use crate::runner::PipelineDeps;

/// URL path a page type is expected to live at. Aliases share a path,
/// which is what makes a fetched page ambiguous.
pub fn hint_path(page_type: &str) -> String {
    match page_type {
        "homepage" => String::new(),
        "about" | "company" => "/about".to_string(),
        "team" | "people" | "leadership" => "/team".to_string(),
        "services" => "/services".to_string(),
        "products" => "/products".to_string(),
        "contact" => "/contact".to_string(),
        "careers" => "/careers".to_string(),
        "pricing" => "/pricing".to_string(),
        other => format!("/{other}"),
    }
}

pub struct DataCollection;

#[async_trait]
impl PhaseExecutor for DataCollection {
    fn name(&self) -> PhaseName {
        PhaseName::DataCollection
    }

    async fn execute(
        &self,
        deps: &PipelineDeps,
        ctx: &mut RunContext,
        run: &mut Run,
    ) -> PhaseOutcome {
        // Group wanted page types by the path they derive to. The homepage
        // is always fetched.
        let mut by_path: BTreeMap<String, Vec<String>> = BTreeMap::new();
        by_path.insert(String::new(), vec!["homepage".to_string()]);
        for question in deps.catalogs.questions.iter().filter(|q| q.active) {
            for page_type in &question.page_types {
                let slot = by_path.entry(hint_path(page_type)).or_default();
                if !slot.contains(page_type) {
                    slot.push(page_type.clone());
                }
            }
        }

        let base = run.company.url.trim_end_matches('/');
        let mut fetch_errors: Vec<String> = Vec::new();

        for (path, candidates) in by_path {
            if deps.cancelled.load(Ordering::Relaxed) {
                return PhaseOutcome::cancelled();
            }

            let url = format!("{base}{path}");
            match deps.chain.fetch(&url).await {
                Ok(outcome) => {
                    ctx.warnings.extend(outcome.warnings);
                    if outcome.skipped || outcome.text.trim().is_empty() {
                        continue;
                    }
                    let page_type = if candidates.len() == 1 {
                        Some(candidates[0].clone())
                    } else {
                        None
                    };
                    ctx.pages.push(ScrapedPage {
                        url,
                        text: outcome.text,
                        used_scraper: outcome.used_scraper,
                        candidates,
                        page_type,
                    });
                }
                Err(e) => {
                    warn!(url, error = %e, "Page fetch failed");
                    fetch_errors.push(e.to_string());
                }
            }
        }

        if ctx.pages.is_empty() {
            let reason = if fetch_errors.is_empty() {
                format!("no content scraped for {}", run.company.url)
            } else {
                fetch_errors.join("; ")
            };
            return PhaseOutcome::failed(reason, ErrorCategory::Transient, TokenUsage::default());
        }

        ctx.warnings.extend(fetch_errors);
        info!(
            company = run.company.url.as_str(),
            pages = ctx.pages.len(),
            "Data collection complete"
        );
        PhaseOutcome::success(TokenUsage::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homepage_maps_to_empty_path() {
        assert_eq!(hint_path("homepage"), "");
        assert_eq!(hint_path("about"), "/about");
        assert_eq!(hint_path("custom_tag"), "/custom_tag");
    }

    #[test]
    fn aliases_share_a_path() {
        assert_eq!(hint_path("about"), hint_path("company"));
        assert_eq!(hint_path("team"), hint_path("people"));
    }
}
