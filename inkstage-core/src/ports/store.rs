// inkstage-core/src/ports/store.rs

// What the pipeline needs from a transactional SQL store, without knowing which one.
// Backends hand out sessions; the pool decides when to open, lease and discard them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::batch::Value;

/// A result row, in select-list order.
pub type Row = Vec<Value>;

/// Tagged kind of a store failure. Retry logic only ever looks at this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// Dropped connection, lock timeout, pool at capacity. Worth retrying.
    Transient,
    /// The statement itself was refused (constraint, syntax, type mismatch).
    Statement,
    /// Unusable store or pool (closed, misconfigured, unreachable for good).
    Fatal,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Statement => "statement",
            Self::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Store error ({kind}): {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, message)
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Statement, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Fatal, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

/// How many rows a read should bring back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    #[default]
    All,
    One,
}

/// Per-session settings forwarded by the pool to the backend.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub encoding: String,
    pub threaded: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            encoding: "UTF-8".to_string(),
            threaded: true,
        }
    }
}

/// One exclusive connection. At most one transaction is open at a time;
/// it starts implicitly with the first statement after a commit/rollback.
#[async_trait]
pub trait StoreSession: Send {
    /// Runs a write statement and returns the affected-row count.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError>;

    async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        mode: FetchMode,
    ) -> Result<Vec<Row>, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn connect(&self, options: &SessionOptions) -> Result<Box<dyn StoreSession>, StoreError>;

    fn engine_name(&self) -> &str;
}
