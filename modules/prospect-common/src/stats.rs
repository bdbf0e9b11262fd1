use serde::{Deserialize, Serialize};

/// Aggregate counters for one batch, emitted as the completion record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub companies: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub transient_failures: u32,
    pub permanent_failures: u32,
    pub low_quality: u32,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

impl std::fmt::Display for BatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} companies: {} succeeded, {} failed ({} transient / {} permanent), \
             {} low-quality, {} tokens, ${:.4}",
            self.companies,
            self.succeeded,
            self.failed,
            self.transient_failures,
            self.permanent_failures,
            self.low_quality,
            self.total_tokens,
            self.total_cost_usd,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_counters() {
        let stats = BatchStats {
            companies: 3,
            succeeded: 2,
            failed: 1,
            transient_failures: 1,
            permanent_failures: 0,
            low_quality: 0,
            total_tokens: 1234,
            total_cost_usd: 0.05,
        };
        let line = stats.to_string();
        assert!(line.contains("3 companies"));
        assert!(line.contains("2 succeeded"));
        assert!(line.contains("1 failed"));
    }
}
