// inkstage-core/src/infrastructure/pool/session.rs

use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;

use super::PoolInner;
use crate::domain::batch::Value;
use crate::ports::store::{FetchMode, Row, StoreError, StoreSession};

/// A leased session. Going out of scope gives it back to the pool; a session
/// with work that was neither committed nor rolled back is discarded instead.
pub struct PooledSession {
    session: Option<Box<dyn StoreSession>>,
    pool: Arc<PoolInner>,
    // Held for the lease's lifetime, released after the session is returned.
    _permit: OwnedSemaphorePermit,
    settled: bool,
}

impl PooledSession {
    pub(crate) fn new(
        session: Box<dyn StoreSession>,
        pool: Arc<PoolInner>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            session: Some(session),
            pool,
            _permit: permit,
            settled: true,
        }
    }

    fn inner(&mut self) -> Result<&mut Box<dyn StoreSession>, StoreError> {
        self.session
            .as_mut()
            .ok_or_else(|| StoreError::fatal("session already released"))
    }

    /// True when no statement ran since the last commit or rollback.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        self.settled = false;
        self.inner()?.execute(sql, params).await
    }

    pub async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        mode: FetchMode,
    ) -> Result<Vec<Row>, StoreError> {
        self.settled = false;
        self.inner()?.query(sql, params, mode).await
    }

    pub async fn commit(&mut self) -> Result<(), StoreError> {
        self.inner()?.commit().await?;
        self.settled = true;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner()?.rollback().await?;
        self.settled = true;
        Ok(())
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session, self.settled);
        }
    }
}
