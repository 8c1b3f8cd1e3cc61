//! In-memory event store implementation for testing.
//!
//! This module provides [`Store`], a thread-safe in-memory implementation of
//! [`EventStore`](super::EventStore) with the same read and push semantics as
//! the SQL backend.
//!
//! # Example
//!
//! ```
//! use eventstore_core::store::inmemory;
//!
//! let store = inmemory::Store::new();
//! ```

use std::{
    collections::BTreeSet,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    aggregate::Aggregate,
    context::CallContext,
    error::{ConcurrencyConflict, Error},
    event::Event,
    query::{Columns, SearchQuery, SearchQueryFactory},
    store::{EventStore, build_error, precondition_rejected, validate_push},
};

/// In-memory event log with a global sequence starting at 1.
///
/// Pushes hold a single write lock for the whole batch, so concurrent pushes
/// against the same stream are serialised and the optimistic-concurrency guard
/// rejects the stale one.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the lock was poisoned.
    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.read()?.events.len())
    }

    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the lock was poisoned.
    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.read()?.events.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, Error> {
        self.inner
            .read()
            .map_err(|_| Error::internal("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, Error> {
        self.inner
            .write()
            .map_err(|_| Error::internal("in-memory store lock poisoned"))
    }

    fn matching<'e>(
        events: impl Iterator<Item = &'e Event>,
        query: &SearchQuery,
    ) -> Vec<&'e Event> {
        let mut matched: Vec<&Event> = events.filter(|event| query.matches(event)).collect();
        if query.desc {
            matched.reverse();
        }
        matched
    }

    fn compile(factory: &SearchQueryFactory, columns: Columns) -> Result<SearchQuery, Error> {
        factory.clone().columns(columns).build().map_err(build_error)
    }
}

fn apply_limit<T>(items: &mut Vec<T>, limit: u64) {
    if let Ok(limit) = usize::try_from(limit)
        && limit > 0
    {
        items.truncate(limit);
    }
}

/// Events appended within one push but not yet committed.
struct Staged {
    events: Vec<Event>,
    next_sequence: u64,
}

impl Staged {
    fn stream_tip(&self, committed: &[Event], aggregate: &Aggregate) -> Option<u64> {
        committed
            .iter()
            .chain(&self.events)
            .filter(|e| {
                e.aggregate_type == aggregate.aggregate_type && e.aggregate_id == aggregate.id
            })
            .map(|e| e.sequence)
            .max()
    }
}

impl EventStore for Store {
    fn health<'a>(
        &'a self,
        _ctx: &'a CallContext,
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a {
        std::future::ready(self.read().map(|_| ()))
    }

    #[tracing::instrument(skip(self, _ctx, factory), fields(queries = factory.query_count()))]
    fn filter<'a>(
        &'a self,
        _ctx: &'a CallContext,
        factory: &'a SearchQueryFactory,
    ) -> impl Future<Output = Result<Vec<Event>, Error>> + Send + 'a {
        let result = (|| -> Result<Vec<Event>, Error> {
            let query = Self::compile(factory, Columns::Event)?;
            let inner = self.read()?;
            let mut events: Vec<Event> = Self::matching(inner.events.iter(), &query)
                .into_iter()
                .cloned()
                .collect();
            drop(inner);
            apply_limit(&mut events, query.limit);
            tracing::trace!(events = events.len(), "filtered events");
            Ok(events)
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, _ctx, factory), fields(queries = factory.query_count()))]
    fn latest_sequence<'a>(
        &'a self,
        _ctx: &'a CallContext,
        factory: &'a SearchQueryFactory,
    ) -> impl Future<Output = Result<u64, Error>> + Send + 'a {
        let result = (|| -> Result<u64, Error> {
            let query = Self::compile(factory, Columns::MaxSequence)?;
            let inner = self.read()?;
            let sequence = Self::matching(inner.events.iter(), &query)
                .into_iter()
                .map(|event| event.sequence)
                .max()
                .unwrap_or(0);
            tracing::trace!(sequence, "retrieved latest sequence");
            Ok(sequence)
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, _ctx, factory), fields(queries = factory.query_count()))]
    fn instance_ids<'a>(
        &'a self,
        _ctx: &'a CallContext,
        factory: &'a SearchQueryFactory,
    ) -> impl Future<Output = Result<Vec<String>, Error>> + Send + 'a {
        let result = (|| -> Result<Vec<String>, Error> {
            let query = Self::compile(factory, Columns::InstanceIds)?;
            let inner = self.read()?;
            let distinct: BTreeSet<&str> = Self::matching(inner.events.iter(), &query)
                .into_iter()
                .map(|event| event.instance_id.as_str())
                .collect();
            let mut ids: Vec<String> = distinct.into_iter().map(ToString::to_string).collect();
            drop(inner);
            apply_limit(&mut ids, query.limit);
            Ok(ids)
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, _ctx, aggregates), fields(aggregates = aggregates.len()))]
    fn push_aggregates<'a>(
        &'a self,
        _ctx: &'a CallContext,
        aggregates: &'a mut [Aggregate],
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a {
        let result = (|| -> Result<(), Error> {
            validate_push(aggregates)?;

            let mut inner = self.write()?;
            let mut staged = Staged {
                next_sequence: inner.events.last().map_or(1, |e| e.sequence + 1),
                events: Vec::new(),
            };

            for aggregate in aggregates.iter() {
                if let Some(precondition) = &aggregate.precondition {
                    let query = Self::compile(&precondition.query, Columns::Event)?;
                    let matched: Vec<Event> =
                        Self::matching(inner.events.iter().chain(&staged.events), &query)
                            .into_iter()
                            .cloned()
                            .collect();
                    (precondition.validation)(&matched).map_err(precondition_rejected)?;
                }

                let tip = staged.stream_tip(&inner.events, aggregate);
                let expected =
                    (aggregate.previous_sequence != 0).then_some(aggregate.previous_sequence);
                if tip != expected {
                    tracing::debug!(?expected, ?tip, "stream moved, rejecting push");
                    return Err(ConcurrencyConflict {
                        aggregate_type: aggregate.aggregate_type.to_string(),
                        aggregate_id: aggregate.id.clone(),
                        expected,
                    }
                    .into());
                }

                let mut previous = aggregate.previous_sequence;
                for event in &aggregate.events {
                    let sequence = staged.next_sequence;
                    staged.next_sequence += 1;
                    staged.events.push(Event {
                        sequence,
                        position: sequence,
                        previous_sequence: previous,
                        ..event.clone()
                    });
                    previous = sequence;
                }
            }

            let mut assigned = staged.events.iter();
            for event in aggregates.iter_mut().flat_map(|a| a.events.iter_mut()) {
                if let Some(stored) = assigned.next() {
                    event.sequence = stored.sequence;
                    event.position = stored.position;
                    event.previous_sequence = stored.previous_sequence;
                    event.creation_date = stored.creation_date;
                }
            }

            let appended = staged.events.len();
            inner.events.extend(staged.events);
            drop(inner);
            tracing::debug!(appended, "events committed");
            Ok(())
        })();
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::{aggregate::AggregateCreator, error::ErrorKind};

    fn ctx() -> CallContext {
        CallContext::new()
            .with_user("editor")
            .with_org("org")
            .with_instance("instance")
    }

    fn user(id: &str, previous_sequence: u64, events: &[&str]) -> Aggregate {
        let mut aggregate = AggregateCreator::new("svc")
            .new_aggregate(&ctx(), id, "user", "v1.0.0", previous_sequence, [])
            .unwrap();
        for event_type in events {
            aggregate.append_event(*event_type, ()).unwrap();
        }
        aggregate
    }

    fn by_id(id: &str) -> SearchQueryFactory {
        SearchQueryFactory::new().add_query().aggregate_ids([id]).factory()
    }

    #[tokio::test]
    async fn push_assigns_consecutive_sequences() {
        let store = Store::new();
        let mut aggregates = [user("u1", 0, &["user.added", "user.renamed", "user.locked"])];

        store.push_aggregates(&ctx(), &mut aggregates).await.unwrap();

        let sequences: Vec<u64> = aggregates[0].events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        let previous: Vec<u64> = aggregates[0]
            .events
            .iter()
            .map(|e| e.previous_sequence)
            .collect();
        assert_eq!(previous, vec![0, 1, 2]);
        assert_eq!(store.len().unwrap(), 3);
    }

    #[tokio::test]
    async fn stale_previous_sequence_is_a_conflict() {
        let store = Store::new();
        store
            .push_aggregates(&ctx(), &mut [user("u1", 0, &["user.added"])])
            .await
            .unwrap();

        let err = store
            .push_aggregates(&ctx(), &mut [user("u1", 0, &["user.added"])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(ConcurrencyConflict { expected: None, .. })
        ));
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        let latest = store.latest_sequence(&ctx(), &by_id("u1")).await.unwrap();
        store
            .push_aggregates(&ctx(), &mut [user("u1", latest, &["user.renamed"])])
            .await
            .unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn previous_sequence_on_empty_stream_is_a_conflict() {
        let store = Store::new();
        let err = store
            .push_aggregates(&ctx(), &mut [user("u1", 5, &["user.added"])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(ConcurrencyConflict { expected: Some(5), .. })
        ));
    }

    #[tokio::test]
    async fn failed_batch_writes_nothing() {
        let store = Store::new();
        let mut aggregates = [
            user("u1", 0, &["user.added"]),
            user("u2", 0, &["user.added"]),
            user("u1", 0, &["user.added"]),
        ];

        let err = store.push_aggregates(&ctx(), &mut aggregates).await.unwrap_err();

        assert!(matches!(err, Error::Conflict(_)));
        assert!(store.is_empty().unwrap());
        assert!(aggregates.iter().flat_map(|a| &a.events).all(|e| e.sequence == 0));
    }

    #[tokio::test]
    async fn two_aggregates_of_same_stream_chain_within_batch() {
        let store = Store::new();
        let mut aggregates = [user("u1", 0, &["user.added"]), user("u1", 1, &["user.renamed"])];
        store.push_aggregates(&ctx(), &mut aggregates).await.unwrap();
        assert_eq!(aggregates[1].events[0].sequence, 2);
    }

    #[tokio::test]
    async fn rejecting_precondition_blocks_push() {
        let store = Store::new();
        let mut aggregate = user("u1", 0, &["user.added"]);
        aggregate.set_precondition(by_id("u1"), |_| Err(io::Error::other("user exists").into()));

        let err = store
            .push_aggregates(&ctx(), &mut [aggregate])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PreconditionFailed { .. }));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn precondition_sees_history_and_staged_events() {
        let store = Store::new();
        store
            .push_aggregates(&ctx(), &mut [user("org-a", 0, &["org.added"])])
            .await
            .unwrap();

        let first = user("u1", 0, &["user.added"]);
        let mut second = user("u2", 0, &["user.added"]);
        second.set_precondition(
            SearchQueryFactory::new()
                .add_query()
                .event_types(["user.added", "org.added"])
                .factory(),
            |events| {
                if events.len() == 2 {
                    Ok(())
                } else {
                    Err(io::Error::other(format!("saw {} events", events.len())).into())
                }
            },
        );

        store
            .push_aggregates(&ctx(), &mut [first, second])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn filter_orders_and_limits() {
        let store = Store::new();
        store
            .push_aggregates(&ctx(), &mut [user("u1", 0, &["a", "b", "c"])])
            .await
            .unwrap();

        let asc = store.filter(&ctx(), &by_id("u1")).await.unwrap();
        assert_eq!(asc.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);

        let desc = SearchQueryFactory::new()
            .order_desc()
            .limit(2)
            .add_query()
            .aggregate_ids(["u1"])
            .factory();
        let events = store.filter(&ctx(), &desc).await.unwrap();
        assert_eq!(events.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[tokio::test]
    async fn filter_with_empty_factory_is_invalid_argument() {
        let store = Store::new();
        let err = store
            .filter(&ctx(), &SearchQueryFactory::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn latest_sequence_of_unknown_stream_is_zero() {
        let store = Store::new();
        assert_eq!(store.latest_sequence(&ctx(), &by_id("nope")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn instance_ids_are_distinct() {
        let store = Store::new();
        let other = CallContext::new()
            .with_user("editor")
            .with_org("org")
            .with_instance("other");
        let mut elsewhere = AggregateCreator::new("svc")
            .new_aggregate(&other, "u9", "user", "v1", 0, [])
            .unwrap();
        elsewhere.append_event("user.added", ()).unwrap();
        store
            .push_aggregates(
                &ctx(),
                &mut [user("u1", 0, &["a"]), user("u2", 0, &["a"]), elsewhere],
            )
            .await
            .unwrap();

        let all = SearchQueryFactory::new()
            .add_query()
            .aggregate_types(["user"])
            .factory();
        let ids = store.instance_ids(&ctx(), &all).await.unwrap();
        assert_eq!(ids, vec!["instance".to_string(), "other".to_string()]);

        let ignored = SearchQueryFactory::new()
            .add_query()
            .ignored_instance_ids(["instance"])
            .factory();
        let ids = store.instance_ids(&ctx(), &ignored).await.unwrap();
        assert_eq!(ids, vec!["other".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_stale_pushes_have_one_winner() {
        let store = Store::new();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut aggregates = [user("u1", 0, &["user.added"])];
                    store.push_aggregates(&ctx(), &mut aggregates).await
                })
            })
            .collect();

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.len().unwrap(), 1);
    }
}
