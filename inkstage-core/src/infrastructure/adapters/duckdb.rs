// inkstage-core/src/infrastructure/adapters/duckdb.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use duckdb::types::Value as DuckValue;
use duckdb::{Config, Connection, ErrorCode, params_from_iter};
use std::sync::{Mutex, PoisonError};

// Imports Hexagonaux
use crate::domain::batch::Value;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::store::{
    FetchMode, Row, SessionOptions, StoreBackend, StoreError, StoreSession,
};

// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

pub struct DuckDbBackend {
    // Every session is a clone of this connection, i.e. the same database.
    root: Mutex<Connection>,
}

impl DuckDbBackend {
    pub fn open(db_path: &str) -> Result<Self, InfrastructureError> {
        let config = Config::default();

        let conn = if db_path == ":memory:" {
            Connection::open_in_memory_with_flags(config)?
        } else {
            Connection::open_with_flags(db_path, config)?
        };

        Ok(Self {
            root: Mutex::new(conn),
        })
    }

    fn connect_sync(&self, options: &SessionOptions) -> Result<DuckDbSession, StoreError> {
        let normalized = options.encoding.replace('-', "").to_lowercase();
        if normalized != "utf8" {
            return Err(StoreError::fatal(format!(
                "encoding '{}' is not supported by DuckDB (UTF-8 only)",
                options.encoding
            )));
        }

        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = root.try_clone().map_err(|e| classify(&e))?;
        Ok(DuckDbSession { conn, in_tx: false })
    }
}

#[async_trait]
impl StoreBackend for DuckDbBackend {
    async fn connect(&self, options: &SessionOptions) -> Result<Box<dyn StoreSession>, StoreError> {
        let session = self.connect_sync(options)?;
        Ok(Box::new(session))
    }

    fn engine_name(&self) -> &str {
        "duckdb"
    }
}

pub struct DuckDbSession {
    conn: Connection,
    in_tx: bool,
}

impl DuckDbSession {
    fn begin(&mut self) -> Result<(), StoreError> {
        if !self.in_tx {
            self.conn
                .execute_batch("BEGIN TRANSACTION")
                .map_err(|e| classify(&e))?;
            self.in_tx = true;
        }
        Ok(())
    }

    fn execute_sync(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        self.begin()?;
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_duck)))
            .map_err(|e| classify(&e))?;
        Ok(affected as u64)
    }

    fn query_sync(
        &mut self,
        sql: &str,
        params: &[Value],
        mode: FetchMode,
    ) -> Result<Vec<Row>, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(|e| classify(&e))?;
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_duck)))
            .map_err(|e| classify(&e))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| classify(&e))? {
            let mut values = Vec::new();
            for idx in 0.. {
                match row.get::<_, DuckValue>(idx) {
                    Ok(v) => values.push(from_duck(v)),
                    Err(duckdb::Error::InvalidColumnIndex(_)) => break,
                    Err(e) => return Err(classify(&e)),
                }
            }
            out.push(values);
            if mode == FetchMode::One {
                break;
            }
        }
        Ok(out)
    }

    fn finish(&mut self, statement: &str) -> Result<(), StoreError> {
        if self.in_tx {
            // The transaction is over either way, even when the statement fails.
            self.in_tx = false;
            self.conn.execute_batch(statement).map_err(|e| classify(&e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StoreSession for DuckDbSession {
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
        self.finish("COMMIT")
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.finish("ROLLBACK")
    }
}

// Error classes DuckDB puts at the head of its messages.
const TRANSIENT_PREFIXES: [&str; 3] = ["IO Error:", "Connection Error:", "Interrupt Error:"];

/// Maps an engine error to the store's failure tags. Only engine failures can
/// be transient; conversion and API errors are always statement errors.
fn classify(err: &duckdb::Error) -> StoreError {
    let message = err.to_string();
    let transient = match err {
        duckdb::Error::DuckDBFailure(failure, detail) => {
            matches!(
                failure.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::FileLockingProtocolFailed
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::OperationInterrupted
            ) || is_transient_message(detail.as_deref().unwrap_or(&message))
        }
        _ => false,
    };

    if transient {
        StoreError::transient(message)
    } else {
        StoreError::statement(message)
    }
}

fn is_transient_message(message: &str) -> bool {
    let message = message.trim_start();
    TRANSIENT_PREFIXES.iter().any(|p| message.starts_with(p))
        || (message.starts_with("TransactionContext Error:")
            && message.to_lowercase().contains("conflict"))
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) if f.is_nan() => DuckValue::Null,
        Value::Float(f) => DuckValue::Double(*f),
        Value::Text(s) => DuckValue::Text(s.clone()),
        // Bound as ISO text, DuckDB casts it on insert.
        Value::Date(d) => DuckValue::Text(d.format("%Y-%m-%d").to_string()),
    }
}

fn from_duck(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Int(i64::from(b)),
        DuckValue::TinyInt(i) => Value::Int(i64::from(i)),
        DuckValue::SmallInt(i) => Value::Int(i64::from(i)),
        DuckValue::Int(i) => Value::Int(i64::from(i)),
        DuckValue::BigInt(i) => Value::Int(i),
        DuckValue::UTinyInt(i) => Value::Int(i64::from(i)),
        DuckValue::USmallInt(i) => Value::Int(i64::from(i)),
        DuckValue::UInt(i) => Value::Int(i64::from(i)),
        DuckValue::UBigInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or(Value::Float(i as f64)),
        DuckValue::HugeInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or(Value::Float(i as f64)),
        DuckValue::Float(f) => Value::Float(f64::from(f)),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or_else(|_| Value::Text(d.to_string())),
        DuckValue::Text(s) => Value::Text(s),
        DuckValue::Date32(days) => days
            .checked_add(UNIX_EPOCH_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(Value::Date)
            .unwrap_or(Value::Null),
        other => Value::Text(format!("{:?}", other)),
    }
}
