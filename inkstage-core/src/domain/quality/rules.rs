// inkstage-core/src/domain/quality/rules.rs

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::domain::batch::RecordBatch;
use crate::domain::quality::engine::QualityEngine;
use crate::domain::quality::report::QualityReport;

/// Data quality rules for one source (e.g. `raw_sales`).
///
/// Sets and maps are ordered so the report lists issues in a stable order.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct QualityRuleSet {
    #[serde(default)]
    pub required_columns: BTreeSet<String>,
    #[serde(default)]
    pub numeric_columns: BTreeSet<String>,
    #[serde(default)]
    pub positive_columns: BTreeSet<String>,
    /// Inclusive `[min, max]` bounds per column.
    #[serde(default)]
    pub range_checks: BTreeMap<String, (f64, f64)>,
    /// Allowed values per column, echoed back in this order.
    #[serde(default)]
    pub categorical_checks: BTreeMap<String, Vec<String>>,
}

impl QualityRuleSet {
    /// Columns whose range is inverted (`min > max`) or not a number.
    pub fn invalid_ranges(&self) -> Vec<String> {
        self.range_checks
            .iter()
            .filter(|(_, (min, max))| min.is_nan() || max.is_nan() || min > max)
            .map(|(col, _)| col.clone())
            .collect()
    }
}

/// Rule sets keyed by source name. Loaded once, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: BTreeMap<String, Arc<QualityRuleSet>>,
}

impl RuleRegistry {
    pub fn new(rules: BTreeMap<String, QualityRuleSet>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(name, set)| (name, Arc::new(set)))
                .collect(),
        }
    }

    pub fn rule_set_for(&self, source_name: &str) -> Option<&QualityRuleSet> {
        self.rules.get(source_name).map(Arc::as_ref)
    }

    pub fn validate(&self, source_name: &str, batch: &RecordBatch) -> QualityReport {
        QualityEngine::validate(source_name, batch, self.rule_set_for(source_name))
    }
}
