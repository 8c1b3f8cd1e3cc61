//! Bounded retry of serializable transactions.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};

use crate::error::Error;

/// How often a transaction is retried after a serialization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff` before retrying.
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_backoff() -> Duration {
    Duration::from_millis(20)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Run `op` in a `SERIALIZABLE` transaction and commit it.
///
/// If `op` or the commit fails with a retryable error (see
/// [`Error::is_retryable`]), the transaction is rolled back and `op` is run
/// again in a fresh one, up to `policy.max_attempts` times. Any other error
/// rolls back and is returned immediately. `op` must therefore not have side
/// effects outside the transaction.
///
/// # Errors
///
/// Returns the error of the last attempt.
#[tracing::instrument(skip_all, fields(max_attempts = policy.max_attempts))]
pub async fn execute_tx<S, T, F>(
    pool: &PgPool,
    policy: &RetryPolicy,
    state: &S,
    mut op: F,
) -> Result<T, Error>
where
    S: Sync + ?Sized,
    T: Send,
    F: for<'c> FnMut(&'c mut PgConnection, &'c S) -> BoxFuture<'c, Result<T, Error>> + Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match attempt_tx(pool, state, &mut op).await {
            Ok(value) => {
                tracing::debug!(attempt, "transaction committed");
                return Ok(value);
            }
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                tracing::warn!(attempt, %error, "serialization conflict, retrying transaction");
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn attempt_tx<S, T, F>(pool: &PgPool, state: &S, op: &mut F) -> Result<T, Error>
where
    S: Sync + ?Sized,
    F: for<'c> FnMut(&'c mut PgConnection, &'c S) -> BoxFuture<'c, Result<T, Error>>,
{
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;

    match op(&mut *tx, state).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::debug!(%rollback, "rollback after failed transaction failed");
            }
            Err(error)
        }
    }
}
