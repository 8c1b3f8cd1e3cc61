//! Helpers connecting an [`EventStore`] with read-models.

use crate::{
    aggregate::Aggregate, context::CallContext, error::Error, event::Event,
    query::SearchQueryFactory, store::EventStore,
};

/// A read-model that can fold events.
pub trait AppendEvents {
    /// Fold `events`, in order, into the read-model.
    ///
    /// # Errors
    ///
    /// Returns an error if an event cannot be applied.
    fn append_events(&mut self, events: &[Event]) -> Result<(), Error>;
}

/// Load the events matching `factory` and fold them into `appender`.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if no event matches, [`Error::Internal`] if the
/// read-model rejects the events, and any error of [`EventStore::filter`].
#[tracing::instrument(skip_all, fields(queries = factory.query_count()))]
pub async fn filter<S, A>(
    store: &S,
    ctx: &CallContext,
    appender: &mut A,
    factory: &SearchQueryFactory,
) -> Result<(), Error>
where
    S: EventStore,
    A: AppendEvents + ?Sized,
{
    let events = store.filter(ctx, factory).await?;
    if events.is_empty() {
        return Err(Error::not_found("no events found"));
    }
    appender
        .append_events(&events)
        .map_err(|e| Error::internal("unable to append events").with_source(e))
}

/// Push `aggregates` and fold the stored events into `appender`.
///
/// The folded events carry the sequences assigned by the store.
///
/// # Errors
///
/// Returns [`Error::PreconditionFailed`] if `aggregates` is empty,
/// [`Error::Internal`] if the read-model rejects the events, and any error of
/// [`EventStore::push_aggregates`].
#[tracing::instrument(skip_all, fields(aggregates = aggregates.len()))]
pub async fn push<S, A>(
    store: &S,
    ctx: &CallContext,
    appender: &mut A,
    aggregates: &mut [Aggregate],
) -> Result<(), Error>
where
    S: EventStore,
    A: AppendEvents + ?Sized,
{
    if aggregates.is_empty() {
        return Err(Error::precondition_failed("no aggregates to push"));
    }
    store.push_aggregates(ctx, aggregates).await?;

    let events: Vec<Event> = aggregates
        .iter()
        .flat_map(|aggregate| aggregate.events.iter().cloned())
        .collect();
    appender
        .append_events(&events)
        .map_err(|e| Error::internal("unable to append events").with_source(e))
}
