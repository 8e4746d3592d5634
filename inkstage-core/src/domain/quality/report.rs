// inkstage-core/src/domain/quality/report.rs

use serde::{Deserialize, Serialize};

/// Categorized outcome of validating one batch against one rule set.
///
/// Any error means the batch must not be staged. Warnings are surfaced to the
/// operator and do not block staging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub source_name: String,
    pub total_rows: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl QualityReport {
    pub fn empty(source_name: &str, total_rows: usize) -> Self {
        Self {
            source_name: source_name.to_string(),
            total_rows,
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}
