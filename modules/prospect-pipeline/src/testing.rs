//! Mock implementations of the pipeline's capability seams.
//!
//! Tests build the fake backends here, drive the real component, and
//! assert on its output; they never reach into a component's internals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use prospect_common::{Company, FieldMapping, Question, Tier, TokenUsage};

use crate::traits::{
    AnswerLlm, CrmWriter, FetchError, LeadRegistry, PageFetcher, QuestionPrompt, RawAnswer,
};

/// Mock answer text that makes the LLM return "provider errored" for the item.
pub const SENTINEL_UNAVAILABLE: &str = "__unavailable__";

// --- StubFetcher ---

#[derive(Debug, Clone)]
enum FetchBehavior {
    Text(String),
    Empty,
    Fail(u16),
}

/// Scraper stub with a default behavior and optional per-URL routes.
pub struct StubFetcher {
    name: String,
    default: FetchBehavior,
    routes: HashMap<String, FetchBehavior>,
}

impl StubFetcher {
    pub fn text(name: &str, text: &str) -> Self {
        Self {
            name: name.into(),
            default: FetchBehavior::Text(text.into()),
            routes: HashMap::new(),
        }
    }

    pub fn empty(name: &str) -> Self {
        Self {
            name: name.into(),
            default: FetchBehavior::Empty,
            routes: HashMap::new(),
        }
    }

    pub fn fail(name: &str, status: u16) -> Self {
        Self {
            name: name.into(),
            default: FetchBehavior::Fail(status),
            routes: HashMap::new(),
        }
    }

    pub fn on(mut self, url: &str, text: &str) -> Self {
        self.routes
            .insert(url.into(), FetchBehavior::Text(text.into()));
        self
    }

    pub fn on_empty(mut self, url: &str) -> Self {
        self.routes.insert(url.into(), FetchBehavior::Empty);
        self
    }

    pub fn on_fail(mut self, url: &str, status: u16) -> Self {
        self.routes.insert(url.into(), FetchBehavior::Fail(status));
        self
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
        let behavior = self.routes.get(url).unwrap_or(&self.default);
        match behavior {
            FetchBehavior::Text(text) => Ok(text.clone()),
            FetchBehavior::Empty => Ok(String::new()),
            FetchBehavior::Fail(status) => Err(FetchError::from_status(
                *status,
                format!("{} {status}", self.name),
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// --- MockLlm ---

#[derive(Default)]
struct MockLlmState {
    /// answer() invocations per tier.
    calls: HashMap<Tier, usize>,
    /// Total prompts dispatched per tier.
    prompts: HashMap<Tier, usize>,
}

/// Scripted answer provider. Responses keyed by (tier, question id), with an
/// any-tier fallback keyed by question id alone.
pub struct MockLlm {
    tiered: HashMap<(Tier, String), String>,
    any_tier: HashMap<String, String>,
    /// (prompt substring, question id, response), matched before the maps,
    /// so answers can vary by which company's pages are in the prompt.
    contextual: Vec<(String, String, String)>,
    failing_tiers: Vec<Tier>,
    cost_per_call: f64,
    classify_reply: Option<String>,
    state: Mutex<MockLlmState>,
}

impl MockLlm {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            tiered: HashMap::new(),
            any_tier: HashMap::new(),
            contextual: Vec::new(),
            failing_tiers: Vec::new(),
            cost_per_call: 0.001,
            classify_reply: None,
            state: Mutex::new(MockLlmState::default()),
        }
    }

    /// Scripted answer used when the prompt contains `needle`.
    pub fn answer_json_when(
        mut self,
        needle: &str,
        question_id: &str,
        value: &str,
        confidence: f64,
    ) -> Self {
        self.contextual.push((
            needle.into(),
            question_id.into(),
            format!(r#"{{"value": "{value}", "confidence": {confidence}}}"#),
        ));
        self
    }

    pub fn answer_json(mut self, question_id: &str, value: &str, confidence: f64) -> Self {
        self.any_tier.insert(
            question_id.into(),
            format!(r#"{{"value": "{value}", "confidence": {confidence}}}"#),
        );
        self
    }

    pub fn answer_json_at(
        mut self,
        tier: Tier,
        question_id: &str,
        value: &str,
        confidence: f64,
    ) -> Self {
        self.tiered.insert(
            (tier, question_id.into()),
            format!(r#"{{"value": "{value}", "confidence": {confidence}}}"#),
        );
        self
    }

    pub fn answer_text(mut self, question_id: &str, text: &str) -> Self {
        self.any_tier.insert(question_id.into(), text.into());
        self
    }

    pub fn fail_at(mut self, tier: Tier) -> Self {
        self.failing_tiers.push(tier);
        self
    }

    pub fn cost_per_call(mut self, cost_usd: f64) -> Self {
        self.cost_per_call = cost_usd;
        self
    }

    pub fn classify_reply(mut self, page_type: &str) -> Self {
        self.classify_reply = Some(page_type.into());
        self
    }

    pub fn calls_at(&self, tier: Tier) -> usize {
        *self.state.lock().unwrap().calls.get(&tier).unwrap_or(&0)
    }

    pub fn prompt_count_at(&self, tier: Tier) -> usize {
        *self.state.lock().unwrap().prompts.get(&tier).unwrap_or(&0)
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: 100,
            output_tokens: 10,
            cost_usd: self.cost_per_call,
        }
    }
}

#[async_trait]
impl AnswerLlm for MockLlm {
    async fn answer(&self, tier: Tier, prompts: Vec<QuestionPrompt>) -> Result<Vec<RawAnswer>> {
        {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(tier).or_default() += 1;
            *state.prompts.entry(tier).or_default() += prompts.len();
        }

        if self.failing_tiers.contains(&tier) {
            return Err(anyhow!("mock tier {tier} unavailable"));
        }

        Ok(prompts
            .into_iter()
            .map(|p| {
                let scripted = self
                    .contextual
                    .iter()
                    .find(|(needle, qid, _)| *qid == p.question_id && p.user.contains(needle))
                    .map(|(_, _, text)| text)
                    .or_else(|| self.tiered.get(&(tier, p.question_id.clone())))
                    .or_else(|| self.any_tier.get(&p.question_id));
                match scripted {
                    Some(text) if text.as_str() == SENTINEL_UNAVAILABLE => RawAnswer {
                        question_id: p.question_id,
                        text: None,
                        usage: self.usage(),
                    },
                    Some(text) => RawAnswer {
                        question_id: p.question_id,
                        text: Some(text.clone()),
                        usage: self.usage(),
                    },
                    None => RawAnswer {
                        question_id: p.question_id,
                        text: Some(r#"{"value": "", "confidence": 0}"#.to_string()),
                        usage: self.usage(),
                    },
                }
            })
            .collect())
    }

    async fn classify(&self, _text: &str, candidates: &[String]) -> Result<(String, TokenUsage)> {
        let chosen = self
            .classify_reply
            .clone()
            .filter(|r| candidates.contains(r))
            .unwrap_or_else(|| candidates[0].clone());
        Ok((chosen, self.usage()))
    }
}

// --- MockCrm ---

#[derive(Default)]
pub struct MockCrm {
    records: Mutex<HashMap<String, HashMap<String, serde_json::Value>>>,
    update_calls: AtomicUsize,
}

impl MockCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, account_id: &str, fields: HashMap<String, serde_json::Value>) -> Self {
        self.records
            .lock()
            .unwrap()
            .insert(account_id.into(), fields);
        self
    }

    pub fn update_call_count(&self) -> usize {
        self.update_calls.load(Ordering::Relaxed)
    }

    pub fn record(&self, account_id: &str) -> HashMap<String, serde_json::Value> {
        self.records
            .lock()
            .unwrap()
            .get(account_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CrmWriter for MockCrm {
    async fn read_fields(
        &self,
        account_id: &str,
        fields: &[String],
    ) -> Result<HashMap<String, serde_json::Value>> {
        let records = self.records.lock().unwrap();
        let record = records.get(account_id).cloned().unwrap_or_default();
        Ok(record
            .into_iter()
            .filter(|(k, _)| fields.contains(k))
            .collect())
    }

    async fn update_fields(
        &self,
        account_id: &str,
        fields: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.lock().unwrap();
        let record = records.entry(account_id.into()).or_default();
        for (k, v) in fields {
            record.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

// --- MockRegistry ---

#[derive(Debug, Clone, Default)]
pub struct MockLeadPage {
    pub status: String,
    pub fields: HashMap<String, String>,
}

/// Scripted lead registry: catalogs plus an in-memory page table.
#[derive(Default)]
pub struct MockRegistry {
    questions: Vec<Question>,
    fields: Vec<FieldMapping>,
    queued: Vec<Company>,
    pages: Mutex<HashMap<String, MockLeadPage>>,
    write_calls: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_questions(mut self, questions: Vec<Question>) -> Self {
        self.questions = questions;
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldMapping>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_queued(mut self, companies: Vec<Company>) -> Self {
        self.queued = companies;
        self
    }

    pub fn with_page(self, page_id: &str, page: MockLeadPage) -> Self {
        self.pages.lock().unwrap().insert(page_id.into(), page);
        self
    }

    pub fn page(&self, page_id: &str) -> Option<MockLeadPage> {
        self.pages.lock().unwrap().get(page_id).cloned()
    }

    pub fn write_call_count(&self) -> usize {
        self.write_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LeadRegistry for MockRegistry {
    async fn fetch_queued(&self, limit: usize) -> Result<Vec<Company>> {
        let mut leads = self.queued.clone();
        if limit > 0 {
            leads.truncate(limit);
        }
        Ok(leads)
    }

    async fn load_questions(&self) -> Result<Vec<Question>> {
        Ok(self.questions.clone())
    }

    async fn load_fields(&self) -> Result<Vec<FieldMapping>> {
        Ok(self.fields.clone())
    }

    async fn read_lead_fields(
        &self,
        page_id: &str,
        destinations: &[String],
    ) -> Result<HashMap<String, String>> {
        let pages = self.pages.lock().unwrap();
        let page = pages.get(page_id).cloned().unwrap_or_default();
        let mut fields: HashMap<String, String> = page
            .fields
            .into_iter()
            .filter(|(k, _)| destinations.contains(k))
            .collect();
        if destinations.iter().any(|d| d == "Status") && !page.status.is_empty() {
            fields.insert("Status".to_string(), page.status);
        }
        Ok(fields)
    }

    async fn write_lead(
        &self,
        page_id: &str,
        status: Option<&str>,
        fields: &HashMap<String, String>,
    ) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        let mut pages = self.pages.lock().unwrap();
        let page = pages.entry(page_id.into()).or_default();
        if let Some(status) = status {
            page.status = status.to_string();
        }
        for (k, v) in fields {
            page.fields.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}
