//! The write path of a push, run inside one serializable transaction.

use chrono::{DateTime, Utc};
use eventstore_core::{
    aggregate::Aggregate,
    context::CallContext,
    error::{BoxError, ConcurrencyConflict},
    event::Event,
    store::precondition_rejected,
};
use futures::{FutureExt, future::BoxFuture};
use serde::de::IgnoredAny;
use sqlx::{Executor, PgConnection, Row, Statement, postgres::PgStatement};

use super::load;
use crate::{
    dialect::Dialect,
    error::{Error, sequence_from_db, sequence_to_db},
    query::build_query,
};

/// Inserts one event if the stream tip of `($2, $3)` equals `$10`. A `NULL`
/// `$10` expects the stream to be empty. Returns no row when the guard fails.
///
/// The payload is bound as text so numbers reach `JSONB` without passing
/// through `f64`.
const INSERT_EVENT: &str = r"
    INSERT INTO eventstore.events (
        event_type,
        aggregate_type,
        aggregate_id,
        aggregate_version,
        event_data,
        editor_user,
        editor_service,
        resource_owner,
        instance_id,
        previous_aggregate_sequence
    )
    SELECT $1::TEXT, $2::TEXT, $3::TEXT, $4::TEXT, $5::TEXT::JSONB, $6::TEXT, $7::TEXT,
           $8::TEXT, $9::TEXT, $10::BIGINT
    WHERE EXISTS (
        SELECT 1
        FROM eventstore.events
        WHERE aggregate_type = $2::TEXT AND aggregate_id = $3::TEXT
        HAVING MAX(event_sequence) = $10::BIGINT OR ($10::BIGINT IS NULL AND COUNT(*) = 0)
    )
    RETURNING event_sequence, creation_date
";

/// Read-only view of a push handed to each transaction attempt.
pub(crate) struct PushState<'a> {
    pub ctx: &'a CallContext,
    pub dialect: Dialect,
    pub aggregates: &'a [Aggregate],
}

/// Values the database assigned to one inserted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Assigned {
    pub sequence: u64,
    pub previous_sequence: u64,
    pub creation_date: DateTime<Utc>,
}

impl Assigned {
    pub(crate) fn write_to(self, event: &mut Event) {
        event.sequence = self.sequence;
        event.position = self.sequence;
        event.previous_sequence = self.previous_sequence;
        event.creation_date = self.creation_date;
    }
}

/// Insert the events of every aggregate, in order, and collect what was
/// assigned to each of them.
pub(crate) fn push_batch<'c>(
    conn: &'c mut PgConnection,
    state: &'c PushState<'_>,
) -> BoxFuture<'c, Result<Vec<Assigned>, Error>> {
    async move {
        let mut assigned =
            Vec::with_capacity(state.aggregates.iter().map(|a| a.events.len()).sum());

        let statement = (&mut *conn).prepare(INSERT_EVENT).await?;

        for aggregate in state.aggregates {
            check_precondition(&mut *conn, state, aggregate).await?;

            let mut previous = aggregate.previous_sequence;
            for event in &aggregate.events {
                let (sequence, creation_date) =
                    insert_event(&mut *conn, &statement, aggregate, event, previous).await?;
                assigned.push(Assigned {
                    sequence,
                    previous_sequence: previous,
                    creation_date,
                });
                previous = sequence;
            }
            tracing::trace!(
                aggregate_type = %aggregate.aggregate_type,
                aggregate_id = %aggregate.id,
                last_sequence = previous,
                "aggregate appended"
            );
        }

        Ok(assigned)
    }
    .boxed()
}

/// Evaluate the aggregate's precondition against the transaction's view.
async fn check_precondition(
    conn: &mut PgConnection,
    state: &PushState<'_>,
    aggregate: &Aggregate,
) -> Result<(), Error> {
    let Some(precondition) = &aggregate.precondition else {
        return Ok(());
    };
    let query = build_query::<Event>(state.ctx, state.dialect, &precondition.query, false)?;
    let events = load::fetch_all(conn, query).await?;
    (precondition.validation)(&events).map_err(precondition_rejected)?;
    Ok(())
}

async fn insert_event(
    conn: &mut PgConnection,
    statement: &PgStatement<'_>,
    aggregate: &Aggregate,
    event: &Event,
    previous: u64,
) -> Result<(u64, DateTime<Utc>), Error> {
    let expected = (previous != 0).then_some(previous);
    let previous_db = expected.map(sequence_to_db).transpose()?;
    let data = event.data.as_deref().map(|bytes| payload_text(event, bytes)).transpose()?;

    let row = statement
        .query()
        .bind(event.event_type.as_str())
        .bind(aggregate.aggregate_type.as_str())
        .bind(aggregate.id.as_str())
        .bind(event.aggregate_version.as_str())
        .bind(data)
        .bind(event.editor_user.as_str())
        .bind(event.editor_service.as_str())
        .bind(event.resource_owner.as_str())
        .bind(event.instance_id.as_str())
        .bind(previous_db)
        .fetch_optional(conn)
        .await?;

    let Some(row) = row else {
        tracing::debug!(?expected, "stream moved, rejecting push");
        return Err(eventstore_core::Error::from(ConcurrencyConflict {
            aggregate_type: aggregate.aggregate_type.to_string(),
            aggregate_id: aggregate.id.clone(),
            expected,
        })
        .into());
    };

    let sequence = sequence_from_db(row.try_get("event_sequence")?)?;
    Ok((sequence, row.try_get("creation_date")?))
}

/// Check that a payload is a well-formed JSON document and borrow it as text.
fn payload_text<'e>(event: &Event, bytes: &'e [u8]) -> Result<&'e str, eventstore_core::Error> {
    std::str::from_utf8(bytes)
        .map_err(BoxError::from)
        .and_then(|text| {
            serde_json::from_str::<IgnoredAny>(text)?;
            Ok(text)
        })
        .map_err(|source| {
            eventstore_core::Error::invalid_argument(format!(
                "payload of event {} is not valid JSON",
                event.event_type
            ))
            .with_source(source)
        })
}
