// inkstage-core/src/application/staging.rs

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::batch::RecordBatch;
use crate::domain::error::DomainError;
use crate::domain::quality::QualityReport;
use crate::domain::staging::{LoadOutcome, StagingTarget};
use crate::error::StageError;
use crate::infrastructure::pool::ConnectionPool;

/// Gate + interval-commit load of one validated batch into its staging table.
pub struct StagingLoader<'p> {
    pool: &'p ConnectionPool,
    commit_interval: usize,
}

impl<'p> StagingLoader<'p> {
    pub fn new(pool: &'p ConnectionPool, commit_interval: usize) -> Self {
        Self {
            pool,
            commit_interval: commit_interval.max(1),
        }
    }

    /// Creates the target table from the batch's shape if it does not exist yet.
    pub async fn ensure_table(
        &self,
        target: &StagingTarget,
        batch: &RecordBatch,
    ) -> Result<(), StageError> {
        if self.pool.table_exists(&target.table).await? {
            return Ok(());
        }
        info!(table = %target.table, "Creating staging table");
        self.pool
            .execute_dml(&target.create_table_sql(batch), &[])
            .await?;
        Ok(())
    }

    /// Refuses the batch (no row sent) when the report carries any error.
    /// Otherwise inserts every row in order, committing every
    /// `commit_interval` rows; a row failure is reported in the outcome.
    pub async fn stage(
        &self,
        batch: &RecordBatch,
        report: &QualityReport,
        target: &StagingTarget,
        cancel: Option<&CancellationToken>,
    ) -> Result<LoadOutcome, StageError> {
        if report.has_errors() {
            warn!(
                source = %target.source_name,
                errors = report.errors.len(),
                "Batch rejected by the quality gate"
            );
            return Err(DomainError::QualityGateRejected {
                source_name: target.source_name.clone(),
                errors: report.errors.clone(),
            }
            .into());
        }

        let rows = batch.project(&target.columns)?;
        info!(
            table = %target.table,
            rows = rows.len(),
            commit_interval = self.commit_interval,
            "Staging batch"
        );

        let mut outcome = self
            .pool
            .execute_batch(target.insert_sql(), &rows, self.commit_interval, cancel)
            .await?;
        outcome.table = target.table.clone();
        Ok(outcome)
    }
}
