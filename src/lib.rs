#![doc = include_str!("../README.md")]

pub use eventstore_core::{
    Error, ErrorKind, aggregate,
    aggregate::{Aggregate, AggregateCreator, AggregateOption, Json},
    context,
    context::CallContext,
    error, event,
    event::{AggregateType, Event, EventType},
    filter, logging, object_root,
    object_root::ObjectRoot,
    query,
    query::{Columns, SearchQueryFactory},
    sdk, version,
};

pub mod telemetry;

pub mod store {
    pub use eventstore_core::store::{
        EventStore, build_error, inmemory, precondition_rejected, validate_push,
    };

    #[cfg(feature = "postgres")]
    #[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
    pub mod postgres {
        pub use eventstore_postgres::{
            Config, DatabaseConfig, Dialect, Error, RetryPolicy, Store, config, dialect,
            pool_options, retry,
        };
    }
}
