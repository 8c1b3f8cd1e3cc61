//! SQL implementation of [`EventStore`].

mod commit;
mod load;

use std::future::Future;

use eventstore_core::{
    Error,
    aggregate::Aggregate,
    context::CallContext,
    event::Event,
    query::SearchQueryFactory,
    store::{EventStore, validate_push},
};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{
    config::{Config, DatabaseConfig},
    dialect::Dialect,
    error::Error as DbError,
    query::{CompiledQuery, InstanceId, MaxSequence, Shape, build_query},
    retry::{RetryPolicy, execute_tx},
};

/// An [`EventStore`] backed by `PostgreSQL` or `CockroachDB`.
///
/// All events live in the single append-only table `eventstore.events`; the
/// global `event_sequence` is assigned by the database. Pushes run in a
/// `SERIALIZABLE` transaction that is retried on serialization failures.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
    dialect: Dialect,
    retry: RetryPolicy,
}

impl Store {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            dialect: Dialect::default(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Open a connection pool and build a store from `config`.
    ///
    /// # Errors
    ///
    /// Returns a `sqlx::Error` if the database cannot be reached.
    #[tracing::instrument(skip_all, fields(dialect = ?config.dialect))]
    pub async fn connect(config: &Config) -> Result<Self, sqlx::Error> {
        let pool = pool_options(&config.database)
            .connect(&config.database.url)
            .await?;
        Ok(Self::new(pool)
            .with_dialect(config.dialect)
            .with_retry_policy(config.retry))
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Apply the schema (idempotent).
    ///
    /// # Errors
    ///
    /// Returns a `sqlx::Error` if any of the schema statements fail.
    #[tracing::instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE SCHEMA IF NOT EXISTS eventstore")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS eventstore.events (
                event_sequence              BIGSERIAL PRIMARY KEY,
                creation_date               TIMESTAMPTZ NOT NULL DEFAULT now(),
                event_type                  TEXT NOT NULL,
                previous_aggregate_sequence BIGINT NULL,
                event_data                  JSONB NULL,
                editor_service              TEXT NOT NULL,
                editor_user                 TEXT NOT NULL,
                resource_owner              TEXT NOT NULL,
                instance_id                 TEXT NOT NULL DEFAULT '',
                aggregate_type              TEXT NOT NULL,
                aggregate_id                TEXT NOT NULL,
                aggregate_version           TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"CREATE INDEX IF NOT EXISTS events_by_stream_and_sequence ON eventstore.events(aggregate_type, aggregate_id, event_sequence)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"CREATE INDEX IF NOT EXISTS events_by_instance ON eventstore.events(instance_id)",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("schema migrated");
        Ok(())
    }

    async fn read<T: Shape>(&self, query: CompiledQuery<T>) -> Result<Vec<T>, Error> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let rows = load::fetch_all(&mut conn, query).await?;
        tracing::trace!(rows = rows.len(), "query returned");
        Ok(rows)
    }
}

/// Pool options for `config`, without connecting.
#[must_use]
pub fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
}

/// Run `operation` within the time left on `ctx`.
async fn within_deadline<T>(
    ctx: &CallContext,
    operation: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match ctx.remaining() {
        None => operation.await,
        Some(remaining) if remaining.is_zero() => Err(Error::DeadlineExceeded),
        Some(remaining) => tokio::time::timeout(remaining, operation)
            .await
            .map_err(|_| {
                tracing::debug!(?remaining, "deadline exceeded");
                Error::DeadlineExceeded
            })?,
    }
}

impl EventStore for Store {
    #[tracing::instrument(skip_all)]
    async fn health<'a>(&'a self, ctx: &'a CallContext) -> Result<(), Error> {
        within_deadline(ctx, async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(DbError::from)?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx, factory), fields(queries = factory.query_count()))]
    async fn filter<'a>(
        &'a self,
        ctx: &'a CallContext,
        factory: &'a SearchQueryFactory,
    ) -> Result<Vec<Event>, Error> {
        let query = build_query::<Event>(ctx, self.dialect, factory, true)?;
        within_deadline(ctx, self.read(query)).await
    }

    #[tracing::instrument(skip(self, ctx, factory), fields(queries = factory.query_count()))]
    async fn latest_sequence<'a>(
        &'a self,
        ctx: &'a CallContext,
        factory: &'a SearchQueryFactory,
    ) -> Result<u64, Error> {
        let query = build_query::<MaxSequence>(ctx, self.dialect, factory, true)?;
        let rows = within_deadline(ctx, self.read(query)).await?;
        Ok(rows.first().map_or(0, |max| max.0))
    }

    #[tracing::instrument(skip(self, ctx, factory), fields(queries = factory.query_count()))]
    async fn instance_ids<'a>(
        &'a self,
        ctx: &'a CallContext,
        factory: &'a SearchQueryFactory,
    ) -> Result<Vec<String>, Error> {
        let query = build_query::<InstanceId>(ctx, self.dialect, factory, true)?;
        let rows = within_deadline(ctx, self.read(query)).await?;
        Ok(rows.into_iter().map(|id| id.0).collect())
    }

    #[tracing::instrument(skip(self, ctx, aggregates), fields(aggregates = aggregates.len()))]
    async fn push_aggregates<'a>(
        &'a self,
        ctx: &'a CallContext,
        aggregates: &'a mut [Aggregate],
    ) -> Result<(), Error> {
        validate_push(aggregates)?;
        if aggregates.is_empty() {
            return Ok(());
        }

        let state = commit::PushState {
            ctx,
            dialect: self.dialect,
            aggregates: &*aggregates,
        };
        let assigned = within_deadline(ctx, async {
            execute_tx(&self.pool, &self.retry, &state, commit::push_batch)
                .await
                .map_err(Error::from)
        })
        .await?;

        let appended = assigned.len();
        let events = aggregates.iter_mut().flat_map(|a| a.events.iter_mut());
        for (event, assigned) in events.zip(assigned) {
            assigned.write_to(event);
        }
        tracing::debug!(appended, "events committed");
        Ok(())
    }
}
