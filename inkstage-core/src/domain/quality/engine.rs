// inkstage-core/src/domain/quality/engine.rs

use std::collections::HashSet;

use crate::domain::batch::{RecordBatch, Value};
use crate::domain::quality::report::QualityReport;
use crate::domain::quality::rules::QualityRuleSet;

pub struct QualityEngine;

impl QualityEngine {
    /// Evaluates every rule against the batch and collects all issues.
    ///
    /// Checks never short-circuit: a missing required column does not stop the
    /// numeric or categorical checks from running on the columns that exist.
    /// Without a rule set the report is empty.
    pub fn validate(
        source_name: &str,
        batch: &RecordBatch,
        rules: Option<&QualityRuleSet>,
    ) -> QualityReport {
        let mut report = QualityReport::empty(source_name, batch.len());
        let Some(rules) = rules else {
            return report;
        };

        Self::check_required(batch, rules, &mut report);
        Self::check_numeric(batch, rules, &mut report);
        Self::check_positive(batch, rules, &mut report);
        Self::check_ranges(batch, rules, &mut report);
        Self::check_categorical(batch, rules, &mut report);

        report
    }

    fn check_required(batch: &RecordBatch, rules: &QualityRuleSet, report: &mut QualityReport) {
        let missing: Vec<&str> = rules
            .required_columns
            .iter()
            .filter(|col| !batch.has_column(col))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            report
                .errors
                .push(format!("Missing required columns: {}", missing.join(", ")));
        }
    }

    fn check_numeric(batch: &RecordBatch, rules: &QualityRuleSet, report: &mut QualityReport) {
        for col in &rules.numeric_columns {
            let offending = count_where(batch, col, |v| !v.is_missing() && v.as_f64().is_none());
            if offending > 0 {
                report
                    .warnings
                    .push(format!("{}: {} non-numeric values", col, offending));
            }
        }
    }

    fn check_positive(batch: &RecordBatch, rules: &QualityRuleSet, report: &mut QualityReport) {
        for col in &rules.positive_columns {
            let negatives = count_where(batch, col, |v| v.as_f64().is_some_and(|n| n < 0.0));
            if negatives > 0 {
                report.errors.push(format!(
                    "{}: {} negative values (should be positive)",
                    col, negatives
                ));
            }
        }
    }

    fn check_ranges(batch: &RecordBatch, rules: &QualityRuleSet, report: &mut QualityReport) {
        for (col, (min, max)) in &rules.range_checks {
            let outside = count_where(batch, col, |v| {
                v.as_f64().is_some_and(|n| n < *min || n > *max)
            });
            if outside > 0 {
                report.warnings.push(format!(
                    "{}: {} values out of range [{}, {}]",
                    col, outside, min, max
                ));
            }
        }
    }

    fn check_categorical(
        batch: &RecordBatch,
        rules: &QualityRuleSet,
        report: &mut QualityReport,
    ) {
        for (col, allowed) in &rules.categorical_checks {
            let members: HashSet<&str> = allowed.iter().map(String::as_str).collect();
            // Null is not a member of any allowed set.
            let invalid = count_where(batch, col, |v| {
                v.is_missing() || !members.contains(v.to_string().as_str())
            });
            if invalid > 0 {
                report.errors.push(format!(
                    "{}: {} invalid values (expected: [{}])",
                    col,
                    invalid,
                    allowed.join(", ")
                ));
            }
        }
    }
}

/// Counts matching values in `column`; an absent column counts zero.
fn count_where(batch: &RecordBatch, column: &str, pred: impl Fn(&Value) -> bool) -> usize {
    batch
        .column_values(column)
        .map(|values| values.filter(|v| pred(v)).count())
        .unwrap_or(0)
}
