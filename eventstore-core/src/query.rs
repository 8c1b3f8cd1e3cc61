//! Search query builder.
//!
//! A [`SearchQueryFactory`] collects one or more sub-queries. Each sub-query
//! produces a conjunction of [`Filter`]s; the sub-queries of a factory are
//! combined with OR. [`SearchQueryFactory::build`] normalises the builder into
//! an immutable [`SearchQuery`] that store backends compile.
//!
//! ```
//! use eventstore_core::query::SearchQueryFactory;
//!
//! let query = SearchQueryFactory::new()
//!     .order_desc()
//!     .limit(10)
//!     .add_query()
//!     .aggregate_types(["user"])
//!     .aggregate_ids(["u1"])
//!     .or()
//!     .event_types(["org.added"])
//!     .factory()
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(query.filters.len(), 2);
//! ```

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;

use crate::{
    error::Error,
    event::{AggregateType, EventType},
    filter::{Field, Filter, FilterValue, Operation},
};

/// Result shape requested from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Columns {
    /// Full events, ordered by sequence.
    #[default]
    Event,
    /// The highest matching sequence.
    MaxSequence,
    /// Distinct instance ids of the matching events.
    InstanceIds,
}

/// Mutable builder for a [`SearchQuery`].
#[derive(Debug, Clone, Default)]
pub struct SearchQueryFactory {
    columns: Columns,
    limit: u64,
    desc: bool,
    queries: Vec<QueryOptions>,
}

impl SearchQueryFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn columns(mut self, columns: Columns) -> Self {
        self.columns = columns;
        self
    }

    /// Maximum number of rows. Zero means unlimited.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub const fn order_asc(mut self) -> Self {
        self.desc = false;
        self
    }

    #[must_use]
    pub const fn order_desc(mut self) -> Self {
        self.desc = true;
        self
    }

    /// Start a new sub-query. Finish it with [`Query::factory`] or chain
    /// another one with [`Query::or`].
    #[must_use]
    pub fn add_query(self) -> Query {
        Query {
            factory: self,
            options: QueryOptions::default(),
        }
    }

    #[must_use]
    pub const fn requested_columns(&self) -> Columns {
        self.columns
    }

    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Normalise the builder into a [`SearchQuery`].
    ///
    /// Each sub-query is turned into its filter list independently. Sequence
    /// bounds follow the read direction: under descending order "greater
    /// than" becomes "less than" and vice versa.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if the factory has no sub-query
    /// or a produced filter is malformed.
    pub fn build(&self) -> Result<SearchQuery, Error> {
        let sub_queries = self
            .queries
            .iter()
            .map(|options| options.filters(self.desc))
            .collect();
        let filters = NonEmpty::from_vec(sub_queries)
            .ok_or_else(|| Error::precondition_failed("search query factory has no sub-query"))?;

        for filter in filters.iter().flatten() {
            filter.validate()?;
        }

        Ok(SearchQuery {
            columns: self.columns,
            limit: self.limit,
            desc: self.desc,
            filters,
        })
    }
}

/// A sub-query under construction. All set options are ANDed.
#[derive(Debug, Clone)]
#[must_use]
pub struct Query {
    factory: SearchQueryFactory,
    options: QueryOptions,
}

#[derive(Debug, Clone, Default)]
struct QueryOptions {
    aggregate_types: Vec<AggregateType>,
    aggregate_ids: Vec<String>,
    event_types: Vec<EventType>,
    sequence_greater: u64,
    sequence_less: u64,
    resource_owner: Option<String>,
    instance_id: Option<String>,
    ignored_instance_ids: Vec<String>,
    creation_date_newer: Option<DateTime<Utc>>,
}

impl Query {
    pub fn aggregate_types<I>(mut self, types: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<AggregateType>,
    {
        self.options
            .aggregate_types
            .extend(types.into_iter().map(Into::into));
        self
    }

    pub fn aggregate_ids<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.options.aggregate_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn event_types<I>(mut self, types: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<EventType>,
    {
        self.options
            .event_types
            .extend(types.into_iter().map(Into::into));
        self
    }

    /// Events after `sequence` in read direction. Zero means no bound.
    pub const fn sequence_greater(mut self, sequence: u64) -> Self {
        self.options.sequence_greater = sequence;
        self
    }

    /// Events before `sequence` in read direction. Zero means no bound.
    pub const fn sequence_less(mut self, sequence: u64) -> Self {
        self.options.sequence_less = sequence;
        self
    }

    pub fn resource_owner(mut self, resource_owner: impl Into<String>) -> Self {
        self.options.resource_owner = Some(resource_owner.into());
        self
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.options.instance_id = Some(instance_id.into());
        self
    }

    pub fn ignored_instance_ids<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.options
            .ignored_instance_ids
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub const fn creation_date_newer(mut self, date: DateTime<Utc>) -> Self {
        self.options.creation_date_newer = Some(date);
        self
    }

    /// Close this sub-query and start another one, ORed with it.
    pub fn or(self) -> Self {
        self.factory().add_query()
    }

    /// Close this sub-query and return to the factory.
    #[must_use]
    pub fn factory(self) -> SearchQueryFactory {
        let Self {
            mut factory,
            options,
        } = self;
        factory.queries.push(options);
        factory
    }
}

impl QueryOptions {
    fn filters(&self, desc: bool) -> Vec<Filter> {
        [
            list_filter(Field::AggregateType, &self.aggregate_types),
            list_filter(Field::AggregateId, &self.aggregate_ids),
            self.sequence_from(desc),
            self.sequence_to(desc),
            list_filter(Field::EventType, &self.event_types),
            text_filter(Field::ResourceOwner, self.resource_owner.as_deref()),
            text_filter(Field::InstanceId, self.instance_id.as_deref()),
            self.ignored_instances(),
            self.creation_date(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn sequence_from(&self, desc: bool) -> Option<Filter> {
        if self.sequence_greater == 0 {
            return None;
        }
        let operation = if desc {
            Operation::Less
        } else {
            Operation::Greater
        };
        Some(Filter::new(
            Field::Sequence,
            operation,
            FilterValue::Sequence(self.sequence_greater),
        ))
    }

    fn sequence_to(&self, desc: bool) -> Option<Filter> {
        if self.sequence_less == 0 {
            return None;
        }
        let operation = if desc {
            Operation::Greater
        } else {
            Operation::Less
        };
        Some(Filter::new(
            Field::Sequence,
            operation,
            FilterValue::Sequence(self.sequence_less),
        ))
    }

    fn ignored_instances(&self) -> Option<Filter> {
        if self.ignored_instance_ids.is_empty() {
            return None;
        }
        Some(Filter::new(
            Field::InstanceId,
            Operation::NotIn,
            FilterValue::TextList(self.ignored_instance_ids.clone()),
        ))
    }

    fn creation_date(&self) -> Option<Filter> {
        self.creation_date_newer.map(|date| {
            Filter::new(
                Field::CreationDate,
                Operation::Greater,
                FilterValue::Timestamp(date),
            )
        })
    }
}

fn list_filter<T: AsRef<str>>(field: Field, values: &[T]) -> Option<Filter> {
    match values {
        [] => None,
        [single] => text_filter(field, Some(single.as_ref())),
        many => Some(Filter::new(
            field,
            Operation::In,
            FilterValue::TextList(many.iter().map(|v| v.as_ref().to_string()).collect()),
        )),
    }
}

fn text_filter(field: Field, value: Option<&str>) -> Option<Filter> {
    value.filter(|v| !v.is_empty()).map(|v| {
        Filter::new(field, Operation::Equals, FilterValue::Text(v.to_string()))
    })
}

/// Immutable, validated form of a [`SearchQueryFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub columns: Columns,
    /// Zero means unlimited.
    pub limit: u64,
    pub desc: bool,
    /// Outer list is ORed, inner lists are ANDed. An empty inner list matches
    /// every event.
    pub filters: NonEmpty<Vec<Filter>>,
}

impl SearchQuery {
    /// Evaluate the filter disjunction against an event in memory.
    #[must_use]
    pub fn matches(&self, event: &crate::event::Event) -> bool {
        self.filters
            .iter()
            .any(|conjunction| conjunction.iter().all(|filter| filter.matches(event)))
    }
}
