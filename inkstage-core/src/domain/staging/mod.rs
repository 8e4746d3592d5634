// inkstage-core/src/domain/staging/mod.rs

pub mod outcome;
pub mod target;

pub use outcome::LoadOutcome;
pub use target::{StagingTarget, quote_ident};
