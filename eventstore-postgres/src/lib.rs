//! SQL backend for the eventstore.
//!
//! - [`Store`] - an implementation of [`eventstore_core::store::EventStore`]
//!   over a single append-only `eventstore.events` table.
//! - [`Dialect`] - `PostgreSQL` or `CockroachDB`; the latter can serve reads
//!   from a historical snapshot (`AS OF SYSTEM TIME`).
//! - [`Config`] - file and environment driven settings for the pool, dialect,
//!   retry policy and logging.
//!
//! ```no_run
//! use eventstore_core::{context::CallContext, query::SearchQueryFactory, store::EventStore};
//! use eventstore_postgres::{Config, Store};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("eventstore.toml")?;
//! let store = Store::connect(&config).await?;
//! store.migrate().await?;
//!
//! let factory = SearchQueryFactory::new()
//!     .add_query()
//!     .aggregate_types(["user"])
//!     .factory();
//! let _events = store.filter(&CallContext::new(), &factory).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialect;
mod error;
mod query;
pub mod retry;
mod store;

pub use config::{Config, DatabaseConfig};
pub use dialect::Dialect;
pub use error::Error;
pub use retry::RetryPolicy;
pub use store::{Store, pool_options};
