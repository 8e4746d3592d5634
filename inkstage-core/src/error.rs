// inkstage-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    // --- ERREURS DU DOMAINE (Quality gate, schéma) ---
    #[error(transparent)]
    Domain(#[from] DomainError),

    // --- ERREURS D'INFRASTRUCTURE (IO, Config, Pool) ---
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    // --- ERREURS DU STORE (surfaced verbatim, never wrapped) ---
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal Error: {0}")]
    InternalError(String),
}

impl StageError {
    /// Only transient store failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::Infrastructure(InfrastructureError::Io(err))
    }
}
