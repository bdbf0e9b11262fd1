pub mod confidence;
pub mod prompt;
pub mod tiered;

pub use tiered::{ExtractionOutcome, TieredExtractor};
