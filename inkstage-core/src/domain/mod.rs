pub mod batch;
pub mod error;
pub mod project;
pub mod quality;
pub mod staging;

// Re-exports pratiques pour simplifier les imports ailleurs
pub use batch::{RecordBatch, Value};
pub use error::DomainError;
