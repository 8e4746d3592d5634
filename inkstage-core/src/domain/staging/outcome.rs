// inkstage-core/src/domain/staging/outcome.rs

use serde::{Deserialize, Serialize};

use crate::ports::store::StoreError;

/// How far a batch load got.
///
/// `rows_committed` only counts rows covered by a successful commit; rows of a
/// rolled-back segment are attempted but never committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub table: String,
    pub rows_attempted: usize,
    pub rows_committed: usize,
    pub commits: usize,
    /// 1-based position (within the submitted rows) of the row that stopped the load.
    pub failed_at_row: Option<usize>,
    pub error: Option<StoreError>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl LoadOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }

    pub fn rows_per_second(&self) -> f64 {
        if self.elapsed_ms == 0 {
            return self.rows_committed as f64;
        }
        self.rows_committed as f64 * 1000.0 / self.elapsed_ms as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_counts_committed_rows_only() {
        let outcome = LoadOutcome {
            rows_attempted: 1500,
            rows_committed: 1000,
            elapsed_ms: 500,
            ..Default::default()
        };
        assert_eq!(outcome.rows_per_second(), 2000.0);

        let instant = LoadOutcome {
            rows_committed: 3,
            ..Default::default()
        };
        assert_eq!(instant.rows_per_second(), 3.0);
    }
}
