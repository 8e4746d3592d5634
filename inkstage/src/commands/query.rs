// inkstage/src/commands/query.rs
//
// USE CASE: Execute a raw SQL query (ad-hoc).

use std::path::PathBuf;

use comfy_table::Table;
use inkstage_core::application::execute_query;

use super::{duckdb_backend, load_config, open_pool};

pub async fn execute(query: String, project_dir: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let pool = open_pool(duckdb_backend(&project_dir, &config)?, &config).await?;

    let result = execute_query(&pool, &query).await;
    pool.close();

    let rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("❌ Query failed: {}", e);
            std::process::exit(1);
        }
    };

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut table = Table::new();
    table.set_header((1..=width).map(|i| format!("#{}", i)));
    for row in &rows {
        table.add_row(row.iter().map(|v| v.to_string()));
    }

    println!("{table}");
    println!("({} row(s))", rows.len());
    Ok(())
}
