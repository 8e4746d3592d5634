// inkstage-core/src/application/engine.rs

use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::error::StageError;
use crate::infrastructure::pool::ConnectionPool;
use crate::ports::store::{FetchMode, Row};

/// Ad-hoc read through the pool, with timing in the logs.
#[instrument(skip(pool), fields(query.len = query.len()))]
pub async fn execute_query(pool: &ConnectionPool, query: &str) -> Result<Vec<Row>, StageError> {
    let start = Instant::now();
    debug!("⚡ Executing Query: {}", query);

    let result = pool.execute_query(query, &[], FetchMode::All).await;
    let duration = start.elapsed();

    match result {
        Ok(rows) => {
            debug!(rows = rows.len(), "✅ Query finished in {:.2?}", duration);
            Ok(rows)
        }
        Err(e) => {
            error!("❌ Query failed after {:.2?}: {}", duration, e);
            Err(e)
        }
    }
}
