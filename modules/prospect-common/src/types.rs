use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ErrorCategory;

// --- Company ---

/// Seed record for one enrichment run. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    /// Lead-registry page id for this company (empty for ad-hoc runs).
    pub lead_id: String,
    pub name: String,
    /// Canonical URL: scheme + host, lowercased (see `normalize_company_url`).
    pub url: String,
    pub salesforce_id: Option<String>,
    pub location: Option<String>,
}

impl Company {
    pub fn new(lead_id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            lead_id: lead_id.into(),
            name: name.into(),
            url: url.into(),
            salesforce_id: None,
            location: None,
        }
    }

    pub fn host(&self) -> &str {
        self.url
            .split("://")
            .nth(1)
            .unwrap_or(&self.url)
            .trim_end_matches('/')
    }
}

// --- Extraction tiers ---

/// Extraction difficulty bucket, bound to a cheap/medium/expensive model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    One,
    Two,
    Three,
}

impl Tier {
    pub fn as_u8(self) -> u8 {
        match self {
            Tier::One => 1,
            Tier::Two => 2,
            Tier::Three => 3,
        }
    }

    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            1 => Some(Tier::One),
            2 => Some(Tier::Two),
            3 => Some(Tier::Three),
            _ => None,
        }
    }

    /// Next tier up, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Tier::One => Some(Tier::Two),
            Tier::Two => Some(Tier::Three),
            Tier::Three => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.as_u8())
    }
}

// --- Question catalog ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Registry page id for the question row.
    pub id: String,
    pub text: String,
    pub tier: Tier,
    /// Target `FieldMapping` key the answer feeds.
    pub field_key: String,
    /// Page-type tags whose scraped text is relevant to this question,
    /// in priority order (e.g. ["about", "homepage"]).
    pub page_types: Vec<String>,
    pub instructions: Option<String>,
    /// Output-format hint appended to the prompt (e.g. "a number, digits only").
    pub output_format: Option<String>,
    pub active: bool,
}

// --- Field catalog ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Number,
    Currency,
    Boolean,
    Phone,
    List,
}

impl std::str::FromStr for DataType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "text" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "currency" => Ok(Self::Currency),
            "boolean" | "bool" => Ok(Self::Boolean),
            "phone" => Ok(Self::Phone),
            "list" => Ok(Self::List),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Unique field key (e.g. "industry").
    pub key: String,
    /// Destination column/field name in the downstream system.
    pub destination_field: String,
    /// Destination object (e.g. "Account").
    pub destination_object: String,
    pub data_type: DataType,
    pub required: bool,
    pub max_length: Option<usize>,
    /// Validation regex applied to the normalized value.
    pub validation: Option<String>,
    pub active: bool,
}

/// Immutable field catalog: key index, destination-field index, required list.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    by_key: HashMap<String, FieldMapping>,
    by_destination: HashMap<String, String>,
    required: Vec<String>,
}

impl FieldRegistry {
    pub fn new(mappings: Vec<FieldMapping>) -> Self {
        let mut by_key = HashMap::new();
        let mut by_destination = HashMap::new();
        let mut required = Vec::new();
        for m in mappings.into_iter().filter(|m| m.active) {
            by_destination.insert(m.destination_field.clone(), m.key.clone());
            if m.required {
                required.push(m.key.clone());
            }
            by_key.insert(m.key.clone(), m);
        }
        required.sort();
        Self {
            by_key,
            by_destination,
            required,
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldMapping> {
        self.by_key.get(key)
    }

    pub fn by_destination_field(&self, destination: &str) -> Option<&FieldMapping> {
        self.by_destination
            .get(destination)
            .and_then(|key| self.by_key.get(key))
    }

    /// Keys of required mappings, sorted for deterministic iteration.
    pub fn required_keys(&self) -> &[String] {
        &self.required
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldMapping> {
        self.by_key.values()
    }
}

// --- Run lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Crawling,
    Extracting,
    Validating,
    Writing,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Crawling => "crawling",
            RunStatus::Extracting => "extracting",
            RunStatus::Validating => "validating",
            RunStatus::Writing => "writing",
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "crawling" => Ok(Self::Crawling),
            "extracting" => Ok(Self::Extracting),
            "validating" => Ok(Self::Validating),
            "writing" => Ok(Self::Writing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    DataCollection,
    Classification,
    Extraction,
    Validation,
    Scoring,
    WriteBack,
}

impl PhaseName {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::DataCollection => "data_collection",
            PhaseName::Classification => "classification",
            PhaseName::Extraction => "extraction",
            PhaseName::Validation => "validation",
            PhaseName::Scoring => "scoring",
            PhaseName::WriteBack => "write_back",
        }
    }

    /// Run status displayed while this phase is active.
    pub fn run_status(self) -> RunStatus {
        match self {
            PhaseName::DataCollection | PhaseName::Classification => RunStatus::Crawling,
            PhaseName::Extraction => RunStatus::Extracting,
            PhaseName::Validation | PhaseName::Scoring => RunStatus::Validating,
            PhaseName::WriteBack => RunStatus::Writing,
        }
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Success,
    Skipped,
    Failed,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Success => "success",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Token counts plus the USD cost they incurred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One observable step in a Run's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    pub status: PhaseStatus,
    pub duration_ms: u64,
    pub usage: TokenUsage,
    pub error: Option<String>,
}

impl Phase {
    pub fn success(name: PhaseName, duration_ms: u64, usage: TokenUsage) -> Self {
        Self {
            name,
            status: PhaseStatus::Success,
            duration_ms,
            usage,
            error: None,
        }
    }

    pub fn skipped(name: PhaseName) -> Self {
        Self {
            name,
            status: PhaseStatus::Skipped,
            duration_ms: 0,
            usage: TokenUsage::default(),
            error: None,
        }
    }

    pub fn failed(name: PhaseName, duration_ms: u64, usage: TokenUsage, error: String) -> Self {
        Self {
            name,
            status: PhaseStatus::Failed,
            duration_ms,
            usage,
            error: Some(error),
        }
    }
}

// --- Extraction output ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAnswer {
    pub question_id: String,
    pub field_key: String,
    pub value: String,
    /// 0..1; 0 means "no usable answer".
    pub confidence: f64,
    /// Tier that produced this answer; ≥ the question's declared tier.
    pub tier: Tier,
    pub source_urls: Vec<String>,
    pub usage: TokenUsage,
    /// True when a later tier replaced this answer. Superseded answers stay
    /// on the Run for cost observability but don't feed validation.
    pub superseded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Truncated,
    Rejected,
    Missing,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationStatus::Valid => "valid",
            ValidationStatus::Truncated => "truncated",
            ValidationStatus::Rejected => "rejected",
            ValidationStatus::Missing => "missing",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_key: String,
    pub value: String,
    pub status: ValidationStatus,
    pub confidence: f64,
}

// --- Run error ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub message: String,
    pub category: ErrorCategory,
    pub failed_phase: PhaseName,
}

// --- Run ---

/// One enrichment attempt for one company. Owned and mutated only by the
/// pipeline runner; committed to the store after every phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub company: Company,
    pub status: RunStatus,
    pub phases: Vec<Phase>,
    pub answers: Vec<ExtractionAnswer>,
    pub field_values: Vec<FieldValue>,
    pub score: f64,
    pub low_quality: bool,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<RunError>,
}

impl Run {
    pub fn new(company: Company) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company,
            status: RunStatus::Queued,
            phases: Vec::new(),
            answers: Vec::new(),
            field_values: Vec::new(),
            score: 0.0,
            low_quality: false,
            total_tokens: 0,
            total_cost_usd: 0.0,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Fold a finished phase into the run. The only place totals are
    /// updated, so Σ phase.tokens == total_tokens holds by construction.
    pub fn record_phase(&mut self, phase: Phase) {
        self.total_tokens += phase.usage.total_tokens();
        self.total_cost_usd += phase.usage.cost_usd;
        self.phases.push(phase);
        self.updated_at = Utc::now();
    }

    pub fn finalize_complete(&mut self) {
        self.status = RunStatus::Complete;
        self.updated_at = Utc::now();
    }

    pub fn finalize_failed(&mut self, error: RunError) {
        self.status = RunStatus::Failed;
        self.error = Some(error);
        self.updated_at = Utc::now();
    }

    /// Non-superseded answers, the set validation consumes.
    pub fn final_answers(&self) -> impl Iterator<Item = &ExtractionAnswer> {
        self.answers.iter().filter(|a| !a.superseded)
    }
}
