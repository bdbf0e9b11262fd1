//! Phase executors, one per step of the run's fixed phase table.

pub mod classification;
pub mod data_collection;
pub mod extraction;
pub mod scoring;
pub mod validation;
pub mod write_back;

pub use classification::Classification;
pub use data_collection::DataCollection;
pub use extraction::Extraction;
pub use scoring::Scoring;
pub use validation::Validation;
pub use write_back::WriteBack;

use async_trait::async_trait;

use prospect_common::{ErrorCategory, PhaseName, PhaseStatus, TokenUsage};

use crate::context::RunContext;
use crate::runner::PipelineDeps;

/// What one phase execution produced. The runner turns this into a
/// persisted `Phase` and decides whether the run continues.
#[derive(Debug)]
pub struct PhaseOutcome {
    pub status: PhaseStatus,
    pub usage: TokenUsage,
    pub error: Option<(String, ErrorCategory)>,
}

impl PhaseOutcome {
    pub fn success(usage: TokenUsage) -> Self {
        Self {
            status: PhaseStatus::Success,
            usage,
            error: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: PhaseStatus::Skipped,
            usage: TokenUsage::default(),
            error: None,
        }
    }

    pub fn failed(
        message: impl Into<String>,
        category: ErrorCategory,
        usage: TokenUsage,
    ) -> Self {
        Self {
            status: PhaseStatus::Failed,
            usage,
            error: Some((message.into(), category)),
        }
    }

    pub fn cancelled() -> Self {
        Self::failed("cancelled", ErrorCategory::Transient, TokenUsage::default())
    }
}

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    fn name(&self) -> PhaseName;

    async fn execute(
        &self,
        deps: &PipelineDeps,
        ctx: &mut RunContext,
        run: &mut prospect_common::Run,
    ) -> PhaseOutcome;
}
