//! Behaviour of the event store contract, exercised against the in-memory
//! store.

use std::io;

use eventstore::{
    Aggregate, AggregateCreator, AggregateOption, CallContext, Columns, Error, ErrorKind,
    SearchQueryFactory, aggregate,
    filter::{Field, Filter, FilterValue, Operation},
    store::{EventStore, inmemory},
};

fn ctx() -> CallContext {
    CallContext::new()
        .with_user("admin")
        .with_org("org-1")
        .with_instance("instance-1")
}

fn user(id: &str, previous_sequence: u64, events: &[&str]) -> Aggregate {
    let mut aggregate = AggregateCreator::new("identity")
        .new_aggregate(&ctx(), id, "user", "v1.0.0", previous_sequence, [])
        .unwrap();
    for event_type in events {
        aggregate.append_event(*event_type, ()).unwrap();
    }
    aggregate
}

fn by_id(id: &str) -> SearchQueryFactory {
    SearchQueryFactory::new()
        .add_query()
        .aggregate_ids([id])
        .factory()
}

// ============================================================================
// Sequencing
// ============================================================================

#[tokio::test]
async fn pushed_events_receive_consecutive_sequences() {
    let store = inmemory::Store::new();
    store
        .push_aggregates(&ctx(), &mut [user("u1", 0, &["user.added"])])
        .await
        .unwrap();

    let previous = store.latest_sequence(&ctx(), &by_id("u1")).await.unwrap();
    let mut next = [user(
        "u1",
        previous,
        &["user.renamed", "user.locked", "user.unlocked"],
    )];
    store.push_aggregates(&ctx(), &mut next).await.unwrap();

    let sequences: Vec<u64> = next[0].events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![previous + 1, previous + 2, previous + 3]);
}

#[tokio::test]
async fn end_to_end_push_then_filter() {
    let store = inmemory::Store::new();
    store
        .push_aggregates(&ctx(), &mut [user("u1", 0, &["user.added"])])
        .await
        .unwrap();

    let events = store.filter(&ctx(), &by_id("u1")).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "user.added");
    assert_eq!(events[0].sequence, 1);
    assert_eq!(events[0].aggregate_version.as_str(), "v1.0.0");
}

// ============================================================================
// Optimistic concurrency
// ============================================================================

#[tokio::test]
async fn stale_push_fails_until_latest_sequence_is_reloaded() {
    let store = inmemory::Store::new();
    store
        .push_aggregates(&ctx(), &mut [user("u1", 0, &["user.added"])])
        .await
        .unwrap();

    let err = store
        .push_aggregates(&ctx(), &mut [user("u1", 0, &["user.added"])])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    let latest = store.latest_sequence(&ctx(), &by_id("u1")).await.unwrap();
    store
        .push_aggregates(&ctx(), &mut [user("u1", latest, &["user.renamed"])])
        .await
        .unwrap();
    assert_eq!(store.filter(&ctx(), &by_id("u1")).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stale_pushes_have_exactly_one_winner() {
    let store = inmemory::Store::new();
    store
        .push_aggregates(&ctx(), &mut [user("u1", 0, &["user.added"])])
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .push_aggregates(&ctx(), &mut [user("u1", 1, &["user.renamed"])])
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(err) => assert!(matches!(err, Error::Conflict(_))),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.latest_sequence(&ctx(), &by_id("u1")).await.unwrap(), 2);
}

#[tokio::test]
async fn non_zero_previous_sequence_on_new_stream_conflicts() {
    let store = inmemory::Store::new();
    let err = store
        .push_aggregates(&ctx(), &mut [user("u1", 3, &["user.added"])])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

// ============================================================================
// Preconditions
// ============================================================================

#[tokio::test]
async fn accepting_precondition_never_blocks() {
    let store = inmemory::Store::new();
    for (index, id) in ["u1", "u2", "u3"].into_iter().enumerate() {
        let mut aggregate = user(id, 0, &["user.added"]);
        aggregate.set_precondition(
            SearchQueryFactory::new()
                .add_query()
                .aggregate_types(["user"])
                .factory(),
            |_| Ok(()),
        );
        store
            .push_aggregates(&ctx(), &mut [aggregate])
            .await
            .unwrap();
        assert_eq!(
            store.latest_sequence(&ctx(), &by_id(id)).await.unwrap(),
            index as u64 + 1
        );
    }
}

#[tokio::test]
async fn rejecting_precondition_always_blocks() {
    let store = inmemory::Store::new();
    for history in [0, 1] {
        if history == 1 {
            store
                .push_aggregates(&ctx(), &mut [user("other", 0, &["user.added"])])
                .await
                .unwrap();
        }
        let mut aggregate = user("u1", 0, &["user.added"]);
        aggregate.set_precondition(by_id("other"), |_| {
            Err(io::Error::other("username taken").into())
        });

        let err = store
            .push_aggregates(&ctx(), &mut [aggregate])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));
    }
    assert_eq!(store.latest_sequence(&ctx(), &by_id("u1")).await.unwrap(), 0);
}

#[tokio::test]
async fn precondition_receives_matching_history() {
    let store = inmemory::Store::new();
    store
        .push_aggregates(&ctx(), &mut [user("u1", 0, &["user.added", "user.locked"])])
        .await
        .unwrap();

    let mut aggregate = user("u2", 0, &["user.added"]);
    aggregate.set_precondition(
        SearchQueryFactory::new()
            .add_query()
            .aggregate_ids(["u1"])
            .event_types(["user.locked"])
            .factory(),
        |events| match events {
            [locked] if locked.event_type == "user.locked" => Ok(()),
            _ => Err(io::Error::other("expected exactly one lock").into()),
        },
    );
    store
        .push_aggregates(&ctx(), &mut [aggregate])
        .await
        .unwrap();
}

// ============================================================================
// Query building
// ============================================================================

#[test]
fn aggregate_ids_compile_to_a_single_in_filter() {
    let query = SearchQueryFactory::new()
        .add_query()
        .aggregate_ids(["a", "b"])
        .factory()
        .build()
        .unwrap();

    assert_eq!(query.filters.len(), 1);
    assert_eq!(
        query.filters.first(),
        &vec![Filter::new(
            Field::AggregateId,
            Operation::In,
            FilterValue::TextList(vec!["a".to_string(), "b".to_string()]),
        )]
    );
}

#[tokio::test]
async fn factory_without_sub_queries_is_rejected() {
    let factory = SearchQueryFactory::new().columns(Columns::Event);
    let err = factory.build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    let store = inmemory::Store::new();
    let err = store.filter(&ctx(), &factory).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// ============================================================================
// Identity
// ============================================================================

#[tokio::test]
async fn infrastructure_can_write_on_behalf_of_another_identity() {
    let store = inmemory::Store::new();
    let mut aggregate = AggregateCreator::new("projection")
        .new_aggregate(
            &ctx(),
            "u1",
            "user",
            "v1",
            0,
            [
                aggregate::overwrite_editor_user("system"),
                AggregateOption::OverwriteResourceOwner("org-2".to_string()),
            ],
        )
        .unwrap();
    aggregate.append_event("user.added", ()).unwrap();
    store
        .push_aggregates(&ctx(), &mut [aggregate])
        .await
        .unwrap();

    let owned_by_org_2 = SearchQueryFactory::new()
        .add_query()
        .resource_owner("org-2")
        .factory();
    let events = store.filter(&ctx(), &owned_by_org_2).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].editor_user, "system");
    assert_eq!(events[0].editor_service, "projection");
}

#[test]
fn aggregate_requires_caller_identity() {
    let err = AggregateCreator::new("identity")
        .new_aggregate(&CallContext::new(), "u1", "user", "v1", 0, [])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}
