// inkstage-core/src/domain/staging/target.rs

use crate::domain::batch::{RecordBatch, Value};
use crate::domain::error::DomainError;

/// Destination of one source batch kind: table, ordered columns and the
/// positional insert template derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingTarget {
    pub source_name: String,
    pub table: String,
    pub columns: Vec<String>,
    insert_sql: String,
}

impl StagingTarget {
    pub fn new(
        source_name: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<String>,
    ) -> Result<Self, DomainError> {
        let table = table.into();
        if table.trim().is_empty() {
            return Err(DomainError::SchemaError(
                "staging table name is empty".into(),
            ));
        }
        if columns.is_empty() {
            return Err(DomainError::SchemaError(format!(
                "staging target '{}' has no columns",
                table
            )));
        }

        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table),
            column_list,
            placeholders
        );

        Ok(Self {
            source_name: source_name.into(),
            table,
            columns,
            insert_sql,
        })
    }

    /// Target whose column order is the batch's own column order.
    pub fn for_batch(
        source_name: impl Into<String>,
        table: impl Into<String>,
        batch: &RecordBatch,
    ) -> Result<Self, DomainError> {
        Self::new(source_name, table, batch.columns().to_vec())
    }

    pub fn insert_sql(&self) -> &str {
        &self.insert_sql
    }

    /// `CREATE TABLE IF NOT EXISTS` with column types guessed from the batch.
    pub fn create_table_sql(&self, batch: &RecordBatch) -> String {
        let defs = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(c), sql_type_for(batch, c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table),
            defs
        )
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type_for(batch: &RecordBatch, column: &str) -> &'static str {
    let Some(values) = batch.column_values(column) else {
        return "VARCHAR";
    };

    let (mut ints, mut floats, mut dates, mut texts) = (0, 0, 0, 0);
    for v in values {
        match v {
            Value::Int(_) => ints += 1,
            Value::Float(f) if !f.is_nan() => floats += 1,
            Value::Date(_) => dates += 1,
            Value::Text(_) => texts += 1,
            _ => {}
        }
    }

    match (ints, floats, dates, texts) {
        (_, _, 0, 0) if floats > 0 => "DOUBLE",
        (i, 0, 0, 0) if i > 0 => "BIGINT",
        (0, 0, d, 0) if d > 0 => "DATE",
        _ => "VARCHAR",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_template_follows_column_order() {
        let target =
            StagingTarget::new("raw_sales", "STG_RAW_SALES", cols(&["sale_id", "qty"])).unwrap();
        assert_eq!(
            target.insert_sql(),
            "INSERT INTO \"STG_RAW_SALES\" (\"sale_id\", \"qty\") VALUES (?, ?)"
        );
    }

    #[test]
    fn test_rejects_empty_column_list() {
        assert!(StagingTarget::new("s", "T", vec![]).is_err());
        assert!(StagingTarget::new("s", " ", cols(&["a"])).is_err());
    }

    #[test]
    fn test_create_table_types() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let batch = RecordBatch::new(
            cols(&["id", "price", "day", "title", "mixed"]),
            vec![
                vec![1.into(), 9.5.into(), d.into(), "A".into(), 1.into()],
                vec![2.into(), 3.into(), Value::Null, "B".into(), "x".into()],
            ],
        )
        .unwrap();
        let target = StagingTarget::for_batch("s", "STG", &batch).unwrap();

        assert_eq!(
            target.create_table_sql(&batch),
            "CREATE TABLE IF NOT EXISTS \"STG\" (\"id\" BIGINT, \"price\" DOUBLE, \"day\" DATE, \"title\" VARCHAR, \"mixed\" VARCHAR)"
        );
    }
}
