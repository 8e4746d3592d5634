// inkstage-core/src/domain/quality/mod.rs

pub mod engine;
pub mod report;
pub mod rules;

pub use engine::QualityEngine;
pub use report::QualityReport;
pub use rules::{QualityRuleSet, RuleRegistry};
