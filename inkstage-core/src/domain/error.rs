// inkstage-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error("Batch '{source_name}' rejected by the quality gate ({} error(s))", errors.len())]
    #[diagnostic(
        code(inkstage::domain::quality_gate),
        help("Fix the reported errors in the source file; no row was sent to the store.")
    )]
    QualityGateRejected {
        source_name: String,
        errors: Vec<String>,
    },

    #[error("Schema Error: {0}")]
    #[diagnostic(code(inkstage::domain::schema))]
    SchemaError(String),

    #[error("Invalid record batch: {0}")]
    #[diagnostic(code(inkstage::domain::batch))]
    InvalidBatch(String),
}
