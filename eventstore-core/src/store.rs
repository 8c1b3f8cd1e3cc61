//! Persistence abstraction for the append-only event log.
//!
//! [`EventStore`] is the narrow contract every backend implements: read events
//! through a [`SearchQueryFactory`], and append [`Aggregate`]s guarded by
//! optimistic concurrency. [`inmemory::Store`] is a reference implementation
//! for tests.

use std::future::Future;

use crate::{
    aggregate::Aggregate, context::CallContext, error::Error, event::Event,
    query::SearchQueryFactory,
};

pub mod inmemory;

/// Abstraction over the append-only event log.
///
/// Reads compile the factory into a store-specific query; an invalid factory
/// fails with [`Error::InvalidArgument`]. Pushes are all-or-nothing across the
/// aggregates of one call.
pub trait EventStore: Send + Sync {
    /// Liveness check of the underlying storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the storage cannot be reached.
    fn health<'a>(
        &'a self,
        ctx: &'a CallContext,
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a;

    /// Load the events matching `factory`, ordered by sequence in the
    /// factory's direction.
    ///
    /// The result shape is always [`Columns::Event`](crate::query::Columns);
    /// the factory's own column selection is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a factory that cannot be built
    /// and [`Error::Internal`] if reading fails.
    fn filter<'a>(
        &'a self,
        ctx: &'a CallContext,
        factory: &'a SearchQueryFactory,
    ) -> impl Future<Output = Result<Vec<Event>, Error>> + Send + 'a;

    /// Highest sequence among the events matching `factory`, or zero if none
    /// match.
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::filter`].
    fn latest_sequence<'a>(
        &'a self,
        ctx: &'a CallContext,
        factory: &'a SearchQueryFactory,
    ) -> impl Future<Output = Result<u64, Error>> + Send + 'a;

    /// Distinct instance ids of the events matching `factory`.
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::filter`].
    fn instance_ids<'a>(
        &'a self,
        ctx: &'a CallContext,
        factory: &'a SearchQueryFactory,
    ) -> impl Future<Output = Result<Vec<String>, Error>> + Send + 'a;

    /// Append the pending events of every aggregate in one transaction.
    ///
    /// For each aggregate, in order, the precondition (if any) is evaluated
    /// and then each event is inserted only if the stream tip still equals the
    /// aggregate's `previous_sequence`. On success the assigned sequence and
    /// creation date are written back onto each event; on failure nothing is
    /// written and the aggregates are left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if an aggregate has no events.
    /// - [`Error::PreconditionFailed`] for structural validation failures and
    ///   rejected preconditions.
    /// - [`Error::Conflict`] if a stream moved past the expected sequence.
    /// - [`Error::Internal`] for storage failures.
    fn push_aggregates<'a>(
        &'a self,
        ctx: &'a CallContext,
        aggregates: &'a mut [Aggregate],
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a;
}

/// Structural checks run by every backend before any I/O.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for an aggregate without events and
/// [`Error::PreconditionFailed`] if an aggregate or one of its events is
/// malformed.
pub fn validate_push(aggregates: &[Aggregate]) -> Result<(), Error> {
    for aggregate in aggregates {
        if aggregate.events.is_empty() {
            return Err(Error::invalid_argument(format!(
                "aggregate {}/{} has no events to push",
                aggregate.aggregate_type, aggregate.id
            )));
        }
        aggregate.validate()?;
        for event in &aggregate.events {
            event.validate()?;
        }
    }
    Ok(())
}

/// Map a factory that cannot be built to [`Error::InvalidArgument`].
#[must_use]
pub fn build_error(source: Error) -> Error {
    Error::invalid_argument("search query is invalid").with_source(source)
}

/// Wrap a rejection returned by a precondition validation callback.
#[must_use]
pub fn precondition_rejected(source: crate::error::BoxError) -> Error {
    Error::PreconditionFailed {
        message: "precondition validation failed".into(),
        source: Some(source),
    }
}
