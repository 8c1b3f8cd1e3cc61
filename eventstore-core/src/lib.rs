//! Core types and storage contract for the eventstore.
//!
//! - [`event`] - Immutable facts (`Event`) and their type names
//! - [`aggregate`] - Pending writes (`Aggregate`, `AggregateCreator`, `Precondition`)
//! - [`object_root`] - Fold helper for read-models (`ObjectRoot`)
//! - [`filter`] - Single predicates (`Filter`, `Field`, `Operation`)
//! - [`query`] - Search query builder (`SearchQueryFactory`, `SearchQuery`)
//! - [`store`] - Persistence abstraction (`EventStore`) and an in-memory store
//! - [`sdk`] - Filter/push helpers for read-models
//! - [`context`] - Per-call identity and timing (`CallContext`)
//! - [`error`] - Error taxonomy (`Error`, `ErrorKind`)
//! - [`logging`] - Log settings (`LogConfig`)
//!
//! # Example
//!
//! ```
//! use eventstore_core::{
//!     aggregate::AggregateCreator, context::CallContext, query::SearchQueryFactory,
//!     store::{EventStore, inmemory},
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = inmemory::Store::new();
//! let ctx = CallContext::new().with_user("user-1").with_org("org-1");
//!
//! let mut user = AggregateCreator::new("identity")
//!     .new_aggregate(&ctx, "u1", "user", "v1.0.0", 0, [])
//!     .unwrap();
//! user.append_event("user.added", ()).unwrap();
//! store.push_aggregates(&ctx, &mut [user]).await.unwrap();
//!
//! let factory = SearchQueryFactory::new().add_query().aggregate_ids(["u1"]).factory();
//! let events = store.filter(&ctx, &factory).await.unwrap();
//! assert_eq!(events[0].sequence, 1);
//! # }
//! ```
//!
//! Most users should depend on the `eventstore` crate, which re-exports these
//! types together with the Postgres backend.

pub mod aggregate;
pub mod context;
pub mod error;
pub mod event;
pub mod filter;
pub mod logging;
pub mod object_root;
pub mod query;
pub mod sdk;
pub mod store;
pub mod version;

pub use error::{Error, ErrorKind};
