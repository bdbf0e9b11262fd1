//! Per-run working state that phases pass between each other but that is
//! not persisted on the Run record.

use std::collections::BTreeMap;

/// One scraped page plus its page-type assignment state.
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub url: String,
    pub text: String,
    pub used_scraper: String,
    /// Page types the URL path could serve, from the hint map.
    pub candidates: Vec<String>,
    /// Assigned page type; None until confident or classified.
    pub page_type: Option<String>,
}

impl ScrapedPage {
    pub fn is_ambiguous(&self) -> bool {
        self.page_type.is_none()
    }
}

/// Working state for one company's run.
#[derive(Debug, Default)]
pub struct RunContext {
    pub pages: Vec<ScrapedPage>,
    /// Non-fatal degradation notes (failed adapters, skipped questions).
    pub warnings: Vec<String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page texts grouped by assigned type. BTreeMap so downstream prompt
    /// assembly iterates deterministically.
    pub fn text_by_page_type(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = BTreeMap::new();
        for page in &self.pages {
            let Some(ref page_type) = page.page_type else {
                continue;
            };
            let slot = map.entry(page_type.clone()).or_default();
            if !slot.is_empty() {
                slot.push_str("\n\n");
            }
            slot.push_str(&page.text);
        }
        map
    }

    /// Source URLs of pages assigned to any of the given types.
    pub fn urls_for_page_types(&self, page_types: &[String]) -> Vec<String> {
        self.pages
            .iter()
            .filter(|p| {
                p.page_type
                    .as_ref()
                    .is_some_and(|t| page_types.contains(t))
            })
            .map(|p| p.url.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, text: &str, page_type: Option<&str>) -> ScrapedPage {
        ScrapedPage {
            url: url.into(),
            text: text.into(),
            used_scraper: "test".into(),
            candidates: vec![],
            page_type: page_type.map(String::from),
        }
    }

    #[test]
    fn text_grouped_by_type_joins_pages() {
        let mut ctx = RunContext::new();
        ctx.pages.push(page("https://a.com", "home text", Some("homepage")));
        ctx.pages.push(page("https://a.com/about", "about text", Some("about")));
        ctx.pages.push(page("https://a.com/x", "untyped", None));

        let by_type = ctx.text_by_page_type();
        assert_eq!(by_type.len(), 2);
        assert_eq!(by_type["about"], "about text");
    }

    #[test]
    fn urls_filtered_by_type() {
        let mut ctx = RunContext::new();
        ctx.pages.push(page("https://a.com", "t", Some("homepage")));
        ctx.pages.push(page("https://a.com/about", "t", Some("about")));

        let urls = ctx.urls_for_page_types(&["about".to_string()]);
        assert_eq!(urls, ["https://a.com/about"]);
    }
}
