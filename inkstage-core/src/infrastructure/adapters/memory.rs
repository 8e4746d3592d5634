// inkstage-core/src/infrastructure/adapters/memory.rs

// In-process store used by `run --dry-run` and by tests that need to inject faults.
// Understands only the statement shapes the loader emits.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use regex::Regex;

use crate::domain::batch::Value;
use crate::ports::store::{
    FetchMode, Row, SessionOptions, StoreBackend, StoreError, StoreErrorKind, StoreSession,
};

#[allow(clippy::expect_used)]
static STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*(insert\s+into|create\s+table(?:\s+if\s+not\s+exists)?|select\s+count\(\*\)\s+from|select\s+\*\s+from|delete\s+from)\s+"?([\w\.]+)"?"#,
    )
    .expect("statement pattern is valid")
});

/// Counters since the backend was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connects: usize,
    /// Insert attempts, failed ones included.
    pub inserts: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub statements: usize,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    connect_failures: u32,
    statement_failures: u32,
    commit_failures: u32,
    /// 1-based global insert attempt that fails, and how.
    fail_insert_at: Option<(usize, StoreErrorKind)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    stats: MemoryStats,
    faults: Faults,
}

#[derive(Debug)]
enum PendingOp {
    Create(String),
    Insert(String, Row),
    Delete(String),
}

#[derive(Debug, PartialEq)]
enum Statement {
    Insert(String),
    Create(String),
    Delete(String),
    Count(String),
    SelectAll(String),
    TableLookup,
}

fn parse(sql: &str) -> Option<Statement> {
    let caps = STATEMENT.captures(sql)?;
    let verb = caps.get(1)?.as_str().to_lowercase();
    let table = caps.get(2)?.as_str().to_lowercase();

    if table == "information_schema.tables" {
        return Some(Statement::TableLookup);
    }
    let verb = verb.split_whitespace().collect::<Vec<_>>();
    match verb.first().copied() {
        Some("insert") => Some(Statement::Insert(table)),
        Some("create") => Some(Statement::Create(table)),
        Some("delete") => Some(Statement::Delete(table)),
        Some("select") if verb.iter().any(|w| w.starts_with("count")) => {
            Some(Statement::Count(table))
        }
        Some("select") => Some(Statement::SelectAll(table)),
        _ => None,
    }
}

/// Shared in-memory tables. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.state)
    }

    pub fn stats(&self) -> MemoryStats {
        self.state().stats
    }

    /// Committed rows of `table`, or `None` if it was never created.
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.state().tables.get(&table.to_lowercase()).cloned()
    }

    pub fn create_table(&self, table: &str) {
        self.state()
            .tables
            .entry(table.to_lowercase())
            .or_default();
    }

    /// Every connect attempt fails with a fatal error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().faults.unreachable = unreachable;
    }

    /// The next `n` connect attempts fail with a transient error.
    pub fn fail_next_connects(&self, n: u32) {
        self.state().faults.connect_failures = n;
    }

    /// The next `n` statements fail with a transient error.
    pub fn fail_next_statements(&self, n: u32) {
        self.state().faults.statement_failures = n;
    }

    /// The next `n` commits fail with a transient error.
    pub fn fail_next_commits(&self, n: u32) {
        self.state().faults.commit_failures = n;
    }

    /// The `nth` insert attempt since creation (1-based) fails with `kind`.
    pub fn fail_insert_at(&self, nth: usize, kind: StoreErrorKind) {
        self.state().faults.fail_insert_at = Some((nth, kind));
    }

    fn connect_sync(&self) -> Result<MemorySession, StoreError> {
        let mut state = self.state();
        if state.faults.unreachable {
            return Err(StoreError::fatal("memory store is unreachable"));
        }
        if state.faults.connect_failures > 0 {
            state.faults.connect_failures -= 1;
            return Err(StoreError::transient("connection refused"));
        }
        state.stats.connects += 1;
        Ok(MemorySession {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        })
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn connect(&self, _options: &SessionOptions) -> Result<Box<dyn StoreSession>, StoreError> {
        let session = self.connect_sync()?;
        Ok(Box::new(session))
    }

    fn engine_name(&self) -> &str {
        "memory"
    }
}

pub struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
    pending: Vec<PendingOp>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySession {
    fn begin_statement(state: &mut MemoryState) -> Result<(), StoreError> {
        state.stats.statements += 1;
        if state.faults.statement_failures > 0 {
            state.faults.statement_failures -= 1;
            return Err(StoreError::transient("connection reset by peer"));
        }
        Ok(())
    }

    fn execute_sync(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        let mut state = lock(&self.state);
        Self::begin_statement(&mut state)?;

        match parse(sql) {
            Some(Statement::Insert(table)) => {
                state.stats.inserts += 1;
                let attempt = state.stats.inserts;
                if let Some((_, kind)) = state.faults.fail_insert_at.filter(|(nth, _)| *nth == attempt) {
                    return Err(StoreError::new(
                        kind,
                        format!("row rejected by {} (insert #{})", table, attempt),
                    ));
                }
                self.pending.push(PendingOp::Insert(table, params.to_vec()));
                Ok(1)
            }
            Some(Statement::Create(table)) => {
                self.pending.push(PendingOp::Create(table));
                Ok(0)
            }
            Some(Statement::Delete(table)) => {
                let affected = state.tables.get(&table).map_or(0, Vec::len);
                self.pending.push(PendingOp::Delete(table));
                Ok(affected as u64)
            }
            _ => Err(StoreError::statement(format!(
                "unsupported statement for the memory store: {}",
                sql.trim()
            ))),
        }
    }

    fn query_sync(
        &mut self,
        sql: &str,
        params: &[Value],
        mode: FetchMode,
    ) -> Result<Vec<Row>, StoreError> {
        let mut state = lock(&self.state);
        Self::begin_statement(&mut state)?;

        let mut rows = match parse(sql) {
            Some(Statement::TableLookup) => {
                let name = params.first().map(|v| v.to_string().to_lowercase());
                let found = name.is_some_and(|n| state.tables.contains_key(&n));
                vec![vec![Value::Int(i64::from(found))]]
            }
            Some(Statement::Count(table)) => {
                let rows = state
                    .tables
                    .get(&table)
                    .ok_or_else(|| StoreError::statement(format!("Table {} does not exist", table)))?;
                vec![vec![Value::Int(rows.len() as i64)]]
            }
            Some(Statement::SelectAll(table)) => state
                .tables
                .get(&table)
                .cloned()
                .ok_or_else(|| StoreError::statement(format!("Table {} does not exist", table)))?,
            _ => {
                return Err(StoreError::statement(format!(
                    "unsupported query for the memory store: {}",
                    sql.trim()
                )));
            }
        };

        if mode == FetchMode::One {
            rows.truncate(1);
        }
        Ok(rows)
    }

    fn commit_sync(&mut self) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.faults.commit_failures > 0 {
            state.faults.commit_failures -= 1;
            return Err(StoreError::transient("connection lost during commit"));
        }
        for op in self.pending.drain(..) {
            match op {
                PendingOp::Create(table) => {
                    state.tables.entry(table).or_default();
                }
                PendingOp::Insert(table, row) => state.tables.entry(table).or_default().push(row),
                PendingOp::Delete(table) => {
                    if let Some(rows) = state.tables.get_mut(&table) {
                        rows.clear();
                    }
                }
            }
        }
        state.stats.commits += 1;
        Ok(())
    }

    fn rollback_sync(&mut self) {
        self.pending.clear();
        lock(&self.state).stats.rollbacks += 1;
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        self.execute_sync(sql, params)
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        mode: FetchMode,
    ) -> Result<Vec<Row>, StoreError> {
        self.query_sync(sql, params, mode)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.commit_sync()
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.rollback_sync();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_shapes() {
        assert_eq!(
            parse(r#"INSERT INTO "STG_DAILY" ("a") VALUES (?)"#),
            Some(Statement::Insert("stg_daily".into()))
        );
        assert_eq!(
            parse(r#"CREATE TABLE IF NOT EXISTS "T" ("a" BIGINT)"#),
            Some(Statement::Create("t".into()))
        );
        assert_eq!(
            parse(r#"SELECT COUNT(*) FROM "T""#),
            Some(Statement::Count("t".into()))
        );
        assert_eq!(
            parse("SELECT COUNT(*) FROM information_schema.tables WHERE lower(table_name) = lower(?)"),
            Some(Statement::TableLookup)
        );
        assert_eq!(parse("UPDATE t SET a = 1"), None);
    }

    #[tokio::test]
    async fn test_rows_are_visible_only_after_commit() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        let mut session = backend.connect(&SessionOptions::default()).await?;

        session.execute(r#"INSERT INTO "t" ("a") VALUES (?)"#, &[Value::Int(1)]).await?;
        assert!(backend.rows("t").is_none());

        session.commit().await?;
        assert_eq!(backend.rows("T").unwrap(), vec![vec![Value::Int(1)]]);

        session.execute(r#"INSERT INTO "t" ("a") VALUES (?)"#, &[Value::Int(2)]).await?;
        session.rollback().await?;
        assert_eq!(backend.rows("t").unwrap().len(), 1);
        assert_eq!(backend.stats().rollbacks, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_insert_failure_keeps_its_kind() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        backend.fail_insert_at(2, StoreErrorKind::Statement);
        let mut session = backend.connect(&SessionOptions::default()).await?;

        let sql = r#"INSERT INTO "t" ("a") VALUES (?)"#;
        assert!(session.execute(sql, &[Value::Int(1)]).await.is_ok());
        let err = session.execute(sql, &[Value::Int(2)]).await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Statement);
        assert_eq!(backend.stats().inserts, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_store_is_fatal() {
        let backend = MemoryBackend::new();
        backend.set_unreachable(true);
        let err = backend.connect(&SessionOptions::default()).await.err().unwrap();
        assert_eq!(err.kind, StoreErrorKind::Fatal);
    }
}
