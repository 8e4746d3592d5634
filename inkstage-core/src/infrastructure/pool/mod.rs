// inkstage-core/src/infrastructure/pool/mod.rs

// Bounded pool of store sessions. Owned by the caller and passed by reference;
// the idle free-list is the only structure behind a lock.

pub mod retry;
pub mod session;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::batch::Value;
use crate::domain::project::PoolConfig;
use crate::domain::staging::{LoadOutcome, quote_ident};
use crate::error::StageError;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::store::{
    FetchMode, Row, SessionOptions, StoreBackend, StoreError, StoreSession,
};

pub use retry::RetryPolicy;
pub use session::PooledSession;

pub(crate) struct PoolInner {
    backend: Arc<dyn StoreBackend>,
    config: PoolConfig,
    options: SessionOptions,
    retry: RetryPolicy,
    idle: Mutex<Vec<Box<dyn StoreSession>>>,
    opened: AtomicUsize,
    leases: Arc<Semaphore>,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn StoreSession>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a released session back, or discards it when it may still hold
    /// uncommitted work or the pool is gone.
    pub(crate) fn release(&self, session: Box<dyn StoreSession>, settled: bool) {
        if settled && !self.closed.load(Ordering::SeqCst) {
            self.idle().push(session);
        } else {
            drop(session);
            self.opened.fetch_sub(1, Ordering::SeqCst);
            debug!(settled, "Session discarded instead of returned to the pool");
        }
    }
}

/// Snapshot of the pool's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub opened: usize,
    pub idle: usize,
    pub leased: usize,
}

pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Opens `config.min` sessions up front. Failing to reach the minimum is
    /// fatal: nothing may be staged without a usable pool.
    #[instrument(skip(backend, config, retry), fields(engine = backend.engine_name()))]
    pub async fn create(
        backend: Arc<dyn StoreBackend>,
        config: PoolConfig,
        retry: RetryPolicy,
    ) -> Result<Self, StageError> {
        let options = SessionOptions {
            encoding: config.encoding.clone(),
            threaded: config.threaded,
        };
        let capacity = config.capacity();

        let mut sessions = Vec::with_capacity(config.min);
        for _ in 0..config.min {
            let session = retry
                .run("open session", || async {
                    backend.connect(&options).await.map_err(StageError::from)
                })
                .await
                .map_err(|e| {
                    error!(min = config.min, "Failed to create connection pool: {}", e);
                    InfrastructureError::PoolCreation {
                        min: config.min,
                        reason: e.to_string(),
                    }
                })?;
            sessions.push(session);
        }

        info!(
            min = config.min,
            max = config.max,
            capacity,
            "Connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                opened: AtomicUsize::new(sessions.len()),
                idle: Mutex::new(sessions),
                leases: Arc::new(Semaphore::new(capacity)),
                closed: AtomicBool::new(false),
                backend,
                config,
                options,
                retry,
            }),
        })
    }

    pub fn engine_name(&self) -> &str {
        self.inner.backend.engine_name()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        let capacity = self.inner.config.capacity();
        PoolStatus {
            opened: self.inner.opened.load(Ordering::SeqCst),
            idle: self.inner.idle().len(),
            leased: capacity.saturating_sub(self.inner.leases.available_permits()),
        }
    }

    /// Leases one session, retrying while the pool is at capacity or the
    /// store cannot be reached.
    pub async fn acquire(&self) -> Result<PooledSession, StageError> {
        self.inner
            .retry
            .run("acquire session", || self.acquire_once())
            .await
    }

    async fn acquire_once(&self) -> Result<PooledSession, StageError> {
        if self.is_closed() {
            return Err(StoreError::fatal("connection pool is closed").into());
        }

        // Never waits here: the retry delay is the only pause between attempts.
        let permit = match Arc::clone(&self.inner.leases).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => {
                return Err(StoreError::fatal("connection pool is closed").into());
            }
            Err(TryAcquireError::NoPermits) => {
                return Err(StoreError::transient(format!(
                    "pool exhausted: all {} session(s) are leased",
                    self.inner.config.capacity()
                ))
                .into());
            }
        };

        let reused = self.inner.idle().pop();
        let session = match reused {
            Some(session) => session,
            None => self.grow().await?,
        };

        Ok(PooledSession::new(session, Arc::clone(&self.inner), permit))
    }

    /// Opens up to `increment` new sessions (capped at `max`), keeps the extras idle
    /// and returns one of them.
    async fn grow(&self) -> Result<Box<dyn StoreSession>, StageError> {
        let config = &self.inner.config;
        let want = |current: usize| config.increment.min(config.max.saturating_sub(current)).max(1);

        let previous = self
            .inner
            .opened
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| Some(cur + want(cur)))
            .unwrap_or_else(|cur| cur);
        let reserved = want(previous);
        debug!(opened = previous, growing_by = reserved, "Growing connection pool");

        let mut fresh = Vec::with_capacity(reserved);
        for _ in 0..reserved {
            match self.inner.backend.connect(&self.inner.options).await {
                Ok(session) => fresh.push(session),
                Err(e) if fresh.is_empty() => {
                    self.inner.opened.fetch_sub(reserved, Ordering::SeqCst);
                    return Err(e.into());
                }
                Err(e) => {
                    warn!("Pool growth stopped early: {}", e);
                    break;
                }
            }
        }

        let unopened = reserved - fresh.len();
        if unopened > 0 {
            self.inner.opened.fetch_sub(unopened, Ordering::SeqCst);
        }

        let session = fresh.pop().ok_or_else(|| {
            StageError::InternalError("pool growth produced no session".into())
        })?;
        self.inner.idle().extend(fresh);
        Ok(session)
    }

    /// Runs `work` on one leased session. Commits when `work` succeeds, rolls
    /// back when it fails, and always gives the session back.
    ///
    /// If the returned future is dropped mid-way, the session is discarded
    /// rather than returned with a dangling transaction.
    pub async fn scoped_session<T, F>(&self, work: F) -> Result<T, StageError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut PooledSession) -> BoxFuture<'s, Result<T, StageError>> + Send,
    {
        let session = self.acquire().await?;
        Self::run_scoped(session, work).await
    }

    async fn run_scoped<T, F>(mut session: PooledSession, work: F) -> Result<T, StageError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut PooledSession) -> BoxFuture<'s, Result<T, StageError>> + Send,
    {
        match work(&mut session).await {
            Ok(value) => match session.commit().await {
                Ok(()) => Ok(value),
                Err(commit_err) => {
                    if let Err(rb) = session.rollback().await {
                        warn!("Rollback after failed commit also failed: {}", rb);
                    }
                    Err(commit_err.into())
                }
            },
            Err(err) => {
                if let Err(rb) = session.rollback().await {
                    warn!("Rollback failed: {}", rb);
                }
                error!("Connection error: {}", err);
                Err(err)
            }
        }
    }

    /// Read path with the pool's retry policy.
    pub async fn execute_query(
        &self,
        sql: &str,
        params: &[Value],
        mode: FetchMode,
    ) -> Result<Vec<Row>, StageError> {
        let sql: Arc<str> = Arc::from(sql);
        let params: Arc<[Value]> = Arc::from(params);

        self.inner
            .retry
            .run("query", || {
                let (sql, params) = (Arc::clone(&sql), Arc::clone(&params));
                async move {
                    let session = self.acquire_once().await?;
                    Self::run_scoped(session, move |s| {
                        Box::pin(async move {
                            s.query(&sql, &params, mode).await.map_err(StageError::from)
                        })
                    })
                    .await
                }
            })
            .await
    }

    /// Single write statement with the pool's retry policy. Returns affected rows.
    pub async fn execute_dml(&self, sql: &str, params: &[Value]) -> Result<u64, StageError> {
        let sql: Arc<str> = Arc::from(sql);
        let params: Arc<[Value]> = Arc::from(params);

        self.inner
            .retry
            .run("dml", || {
                let (sql, params) = (Arc::clone(&sql), Arc::clone(&params));
                async move {
                    let session = self.acquire_once().await?;
                    Self::run_scoped(session, move |s| {
                        Box::pin(async move {
                            s.execute(&sql, &params).await.map_err(StageError::from)
                        })
                    })
                    .await
                }
            })
            .await
    }

    /// Bulk insert on a single session with a commit every `commit_interval` rows.
    ///
    /// Not retried here: replaying a partially applied batch would insert rows
    /// twice. A row failure rolls back the current segment only and is reported
    /// in the outcome (not as an `Err`); only acquisition failures are `Err`.
    /// `cancel` is checked after each intermediate commit.
    pub async fn execute_batch(
        &self,
        sql: &str,
        rows: &[Vec<Value>],
        commit_interval: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<LoadOutcome, StageError> {
        let interval = commit_interval.max(1);
        let started = Instant::now();
        let mut session = self.acquire().await?;
        let mut outcome = LoadOutcome::default();
        let mut since_commit = 0usize;

        for (idx, row) in rows.iter().enumerate() {
            let position = idx + 1;
            outcome.rows_attempted = position;

            if let Err(e) = session.execute(sql, row).await {
                return Ok(abort_batch(session, outcome, position, e, started).await);
            }
            since_commit += 1;

            if since_commit == interval {
                if let Err(e) = session.commit().await {
                    return Ok(abort_batch(session, outcome, position, e, started).await);
                }
                outcome.commits += 1;
                outcome.rows_committed = position;
                since_commit = 0;
                debug!(rows = position, "Batch committed");

                if position < rows.len() && cancel.is_some_and(CancellationToken::is_cancelled) {
                    warn!(
                        committed = outcome.rows_committed,
                        remaining = rows.len() - position,
                        "Batch insert cancelled at a commit boundary"
                    );
                    outcome.cancelled = true;
                    outcome.elapsed_ms = started.elapsed().as_millis() as u64;
                    return Ok(outcome);
                }
            }
        }

        if since_commit > 0 {
            if let Err(e) = session.commit().await {
                let position = outcome.rows_attempted;
                return Ok(abort_batch(session, outcome, position, e, started).await);
            }
            outcome.commits += 1;
            outcome.rows_committed = outcome.rows_attempted;
        }

        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            rows = outcome.rows_committed,
            commits = outcome.commits,
            "Batch insert complete: {} rows",
            outcome.rows_committed
        );
        Ok(outcome)
    }

    pub async fn table_count(&self, table: &str) -> Result<u64, StageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let rows = self.execute_query(&sql, &[], FetchMode::One).await?;
        Ok(first_scalar(&rows).map(|n| n as u64).unwrap_or(0))
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool, StageError> {
        let rows = self
            .execute_query(
                "SELECT COUNT(*) FROM information_schema.tables WHERE lower(table_name) = lower(?)",
                &[Value::from(table)],
                FetchMode::One,
            )
            .await?;
        Ok(first_scalar(&rows).is_some_and(|n| n > 0.0))
    }

    /// Drops every idle session and refuses new leases. Safe to call twice.
    /// Sessions still leased are discarded when their holder releases them.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Connection pool already closed");
            return;
        }
        self.inner.leases.close();

        let drained = std::mem::take(&mut *self.inner.idle());
        self.inner.opened.fetch_sub(drained.len(), Ordering::SeqCst);
        let released = drained.len();
        drop(drained);

        info!(released, "Connection pool closed");
    }
}

async fn abort_batch(
    mut session: PooledSession,
    mut outcome: LoadOutcome,
    position: usize,
    err: StoreError,
    started: Instant,
) -> LoadOutcome {
    if let Err(rb) = session.rollback().await {
        warn!("Rollback of the current segment failed: {}", rb);
    }
    error!(
        row = position,
        committed = outcome.rows_committed,
        "Batch insert failed at row {}: {}",
        position,
        err
    );
    outcome.failed_at_row = Some(position);
    outcome.error = Some(err);
    outcome.elapsed_ms = started.elapsed().as_millis() as u64;
    outcome
}

fn first_scalar(rows: &[Row]) -> Option<f64> {
    rows.first()
        .and_then(|row| row.first())
        .and_then(Value::as_f64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests;
