// inkstage-core/src/application/mod.rs

pub mod engine;
pub mod pipeline;
pub mod staging;

// --- RE-EXPORTS (FACADE PATTERN) ---
// `use inkstage_core::application::{run_pipeline, StagingLoader};`

pub use engine::execute_query;
pub use pipeline::{RunResult, SourceRun, run_pipeline, validate_sources};
pub use staging::StagingLoader;
