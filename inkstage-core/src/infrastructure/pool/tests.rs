use super::*;
use crate::infrastructure::adapters::memory::MemoryBackend;
use crate::ports::store::StoreErrorKind;
use anyhow::Result;
use std::time::Duration;

const INSERT: &str = r#"INSERT INTO "stg" ("id") VALUES (?)"#;

fn pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min,
        max,
        ..Default::default()
    }
}

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(10))
}

async fn memory_pool(min: usize, max: usize) -> Result<(MemoryBackend, ConnectionPool)> {
    let backend = MemoryBackend::new();
    let pool = ConnectionPool::create(
        Arc::new(backend.clone()),
        pool_config(min, max),
        fast_retry(3),
    )
    .await?;
    Ok((backend, pool))
}

fn ids(n: i64) -> Vec<Vec<Value>> {
    (1..=n).map(|i| vec![Value::Int(i)]).collect()
}

#[tokio::test]
async fn test_create_opens_minimum_sessions() -> Result<()> {
    let (backend, pool) = memory_pool(2, 4).await?;
    assert_eq!(backend.stats().connects, 2);
    assert_eq!(
        pool.status(),
        PoolStatus {
            opened: 2,
            idle: 2,
            leased: 0
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_create_fails_when_store_unreachable() {
    let backend = MemoryBackend::new();
    backend.set_unreachable(true);
    let result = ConnectionPool::create(Arc::new(backend), pool_config(1, 2), fast_retry(2)).await;

    assert!(matches!(
        result,
        Err(StageError::Infrastructure(InfrastructureError::PoolCreation { min: 1, .. }))
    ));
}

#[tokio::test]
async fn test_create_survives_transient_connect_failures() -> Result<()> {
    let backend = MemoryBackend::new();
    backend.fail_next_connects(2);
    let pool = ConnectionPool::create(Arc::new(backend.clone()), pool_config(1, 2), fast_retry(3)).await?;
    assert_eq!(pool.status().opened, 1);
    Ok(())
}

#[tokio::test]
async fn test_pool_grows_up_to_max() -> Result<()> {
    let (backend, pool) = memory_pool(1, 3).await?;

    let a = pool.acquire().await?;
    let b = pool.acquire().await?;
    let c = pool.acquire().await?;
    assert_eq!(backend.stats().connects, 3);
    assert_eq!(pool.status().leased, 3);

    // Full: every attempt of the next lease finds no free slot.
    let err = pool.acquire().await.err().and_then(|e| e.as_store_error().cloned());
    assert_eq!(err.map(|e| e.kind), Some(StoreErrorKind::Transient));

    drop((a, b, c));
    assert_eq!(
        pool.status(),
        PoolStatus {
            opened: 3,
            idle: 3,
            leased: 0
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_released_lease_unblocks_waiter() -> Result<()> {
    let backend = MemoryBackend::new();
    let pool = Arc::new(
        ConnectionPool::create(
            Arc::new(backend),
            pool_config(1, 1),
            RetryPolicy::new(3, Duration::from_millis(200)),
        )
        .await?,
    );

    let held = pool.acquire().await?;
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    assert!(waiter.await?.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_exhausted_acquire_stays_within_retry_budget() -> Result<()> {
    let retry = RetryPolicy::new(3, Duration::from_millis(200));
    let pool = ConnectionPool::create(Arc::new(MemoryBackend::new()), pool_config(1, 1), retry).await?;
    let _held = pool.acquire().await?;

    let started = std::time::Instant::now();
    let err = pool.acquire().await.err().and_then(|e| e.as_store_error().cloned());
    let elapsed = started.elapsed();

    assert_eq!(err.map(|e| e.kind), Some(StoreErrorKind::Transient));
    assert!(elapsed >= retry.worst_case_wait());
    assert!(
        elapsed < retry.delay * retry.max_attempts,
        "waited {:?}",
        elapsed
    );
    Ok(())
}

#[tokio::test]
async fn test_unsettled_session_is_discarded() -> Result<()> {
    let (_backend, pool) = memory_pool(1, 2).await?;
    {
        let mut session = pool.acquire().await?;
        session.execute(INSERT, &[Value::Int(1)]).await?;
        assert!(!session.is_settled());
    }
    assert_eq!(pool.status().opened, 0);
    assert_eq!(pool.status().idle, 0);

    // The pool opens a replacement on demand.
    let session = pool.acquire().await?;
    assert!(session.is_settled());
    Ok(())
}

#[tokio::test]
async fn test_scoped_session_commits_on_success() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    let inserted = pool
        .scoped_session(|s| {
            Box::pin(async move {
                s.execute(INSERT, &[Value::Int(7)]).await?;
                Ok(1)
            })
        })
        .await?;

    assert_eq!(inserted, 1);
    assert_eq!(backend.rows("stg").map(|r| r.len()), Some(1));
    assert_eq!(pool.status().idle, 1);
    Ok(())
}

#[tokio::test]
async fn test_scoped_session_rolls_back_on_error() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    let result: Result<(), StageError> = pool
        .scoped_session(|s| {
            Box::pin(async move {
                s.execute(INSERT, &[Value::Int(7)]).await?;
                Err(StageError::InternalError("boom".into()))
            })
        })
        .await;

    assert!(matches!(result, Err(StageError::InternalError(_))));
    assert!(backend.rows("stg").is_none());
    assert_eq!(backend.stats().rollbacks, 1);
    assert_eq!(pool.status().idle, 1);
    Ok(())
}

#[tokio::test]
async fn test_execute_dml_retries_transient_failures() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    backend.fail_next_statements(2);

    let affected = pool.execute_dml(INSERT, &[Value::Int(1)]).await?;
    assert_eq!(affected, 1);
    assert_eq!(backend.rows("stg").map(|r| r.len()), Some(1));
    assert_eq!(backend.stats().statements, 3);
    Ok(())
}

#[tokio::test]
async fn test_execute_dml_gives_up_after_max_attempts() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    backend.fail_next_statements(10);

    let err = pool.execute_dml(INSERT, &[Value::Int(1)]).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(backend.stats().statements, 3);
    Ok(())
}

#[tokio::test]
async fn test_statement_error_is_not_retried() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    let err = pool.execute_dml("UPDATE stg SET id = 2", &[]).await.unwrap_err();

    assert_eq!(err.as_store_error().map(|e| e.kind), Some(StoreErrorKind::Statement));
    assert_eq!(backend.stats().statements, 1);
    Ok(())
}

#[tokio::test]
async fn test_execute_query_fetch_one() -> Result<()> {
    let (_backend, pool) = memory_pool(1, 2).await?;
    pool.execute_batch(INSERT, &ids(5), 10, None).await?;

    let all = pool
        .execute_query(r#"SELECT * FROM "stg""#, &[], FetchMode::All)
        .await?;
    let one = pool
        .execute_query(r#"SELECT * FROM "stg""#, &[], FetchMode::One)
        .await?;
    assert_eq!(all.len(), 5);
    assert_eq!(one, vec![vec![Value::Int(1)]]);
    Ok(())
}

#[tokio::test]
async fn test_batch_commits_every_interval() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    let outcome = pool.execute_batch(INSERT, &ids(2500), 1000, None).await?;

    assert!(outcome.is_success());
    assert_eq!(outcome.rows_attempted, 2500);
    assert_eq!(outcome.rows_committed, 2500);
    assert_eq!(outcome.commits, 3);
    assert_eq!(backend.stats().commits, 3);
    assert_eq!(backend.stats().inserts, 2500);
    assert_eq!(backend.rows("stg"), Some(ids(2500)));
    assert_eq!(pool.table_count("stg").await?, 2500);
    Ok(())
}

#[tokio::test]
async fn test_batch_exact_multiple_has_no_extra_commit() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    let outcome = pool.execute_batch(INSERT, &ids(2000), 1000, None).await?;

    assert_eq!(outcome.commits, 2);
    assert_eq!(backend.stats().commits, 2);
    Ok(())
}

#[tokio::test]
async fn test_batch_failure_keeps_committed_segments() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    backend.fail_insert_at(1500, StoreErrorKind::Statement);

    let outcome = pool.execute_batch(INSERT, &ids(2500), 1000, None).await?;

    assert!(!outcome.is_success());
    assert_eq!(outcome.failed_at_row, Some(1500));
    assert_eq!(outcome.rows_committed, 1000);
    assert_eq!(outcome.commits, 1);
    assert_eq!(outcome.error.map(|e| e.kind), Some(StoreErrorKind::Statement));
    // Rows 1..=1000 kept in order, 1001..=1500 rolled back, nothing sent after 1500.
    assert_eq!(backend.rows("stg"), Some(ids(1000)));
    assert_eq!(backend.stats().inserts, 1500);
    assert_eq!(backend.stats().rollbacks, 1);
    Ok(())
}

#[tokio::test]
async fn test_batch_commit_failure_points_at_triggering_row() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    backend.fail_next_commits(1);

    let outcome = pool.execute_batch(INSERT, &ids(25), 10, None).await?;

    assert_eq!(outcome.failed_at_row, Some(10));
    assert_eq!(outcome.rows_committed, 0);
    assert_eq!(outcome.commits, 0);
    assert!(outcome.error.is_some_and(|e| e.is_transient()));
    Ok(())
}

#[tokio::test]
async fn test_batch_stops_at_commit_boundary_when_cancelled() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    let token = CancellationToken::new();
    token.cancel();

    let outcome = pool.execute_batch(INSERT, &ids(25), 10, Some(&token)).await?;

    assert!(outcome.cancelled);
    assert_eq!(outcome.rows_committed, 10);
    assert_eq!(outcome.commits, 1);
    assert_eq!(backend.rows("stg").map(|r| r.len()), Some(10));
    Ok(())
}

#[tokio::test]
async fn test_empty_batch_issues_no_commit() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    let outcome = pool.execute_batch(INSERT, &[], 1000, None).await?;

    assert!(outcome.is_success());
    assert_eq!(outcome.commits, 0);
    assert_eq!(backend.stats().commits, 0);
    Ok(())
}

#[tokio::test]
async fn test_table_exists_and_count() -> Result<()> {
    let (backend, pool) = memory_pool(1, 2).await?;
    assert!(!pool.table_exists("STG_DAILY").await?);

    backend.create_table("stg_daily");
    assert!(pool.table_exists("STG_DAILY").await?);
    assert_eq!(pool.table_count("stg_daily").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent_and_refuses_leases() -> Result<()> {
    let (_backend, pool) = memory_pool(2, 3).await?;
    pool.close();
    pool.close();

    assert!(pool.is_closed());
    assert_eq!(pool.status().opened, 0);
    let err = pool.acquire().await.err().and_then(|e| e.as_store_error().cloned());
    assert_eq!(err.map(|e| e.kind), Some(StoreErrorKind::Fatal));
    Ok(())
}

#[tokio::test]
async fn test_lease_outstanding_at_close_is_discarded() -> Result<()> {
    let (_backend, pool) = memory_pool(1, 1).await?;
    let session = pool.acquire().await?;
    pool.close();
    drop(session);

    assert_eq!(
        pool.status(),
        PoolStatus {
            opened: 0,
            idle: 0,
            leased: 0
        }
    );
    Ok(())
}
