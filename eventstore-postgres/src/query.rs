//! Compiles a [`SearchQueryFactory`] into SQL, bound values and a row scanner.

use chrono::{DateTime, Utc};
use eventstore_core::{
    context::CallContext,
    event::{AggregateType, Event, EventType},
    filter::{Field, Filter, FilterValue, Operation},
    query::{Columns, SearchQuery, SearchQueryFactory},
    store::build_error,
    version::Version,
};
use sqlx::{
    Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query,
};

use crate::{
    dialect::{Dialect, number_placeholder},
    error::{Error, sequence_from_db, sequence_to_db},
};

/// A result shape the compiler can select and scan.
pub(crate) trait Shape: Sized + Send + Unpin {
    const COLUMNS: Columns;

    fn scan(row: &PgRow) -> Result<Self, Error>;
}

impl Shape for Event {
    const COLUMNS: Columns = Columns::Event;

    fn scan(row: &PgRow) -> Result<Self, Error> {
        let sequence = sequence_from_db(row.try_get("event_sequence")?)?;
        let previous_sequence = row
            .try_get::<Option<i64>, _>("previous_aggregate_sequence")?
            .map(sequence_from_db)
            .transpose()?
            .unwrap_or(0);
        let data = row
            .try_get::<Option<String>, _>("event_data")?
            .map(String::into_bytes);

        Ok(Self {
            sequence,
            position: sequence,
            previous_sequence,
            creation_date: row.try_get("creation_date")?,
            event_type: EventType::new(row.try_get::<String, _>("event_type")?),
            data,
            editor_service: row.try_get("editor_service")?,
            editor_user: row.try_get("editor_user")?,
            resource_owner: row.try_get("resource_owner")?,
            instance_id: row.try_get("instance_id")?,
            aggregate_type: AggregateType::new(row.try_get::<String, _>("aggregate_type")?),
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_version: Version::unchecked(row.try_get("aggregate_version")?),
        })
    }
}

/// Highest matching sequence; zero when nothing matched.
pub(crate) struct MaxSequence(pub u64);

impl Shape for MaxSequence {
    const COLUMNS: Columns = Columns::MaxSequence;

    fn scan(row: &PgRow) -> Result<Self, Error> {
        let max = row
            .try_get::<Option<i64>, _>(0)?
            .map(sequence_from_db)
            .transpose()?;
        Ok(Self(max.unwrap_or(0)))
    }
}

pub(crate) struct InstanceId(pub String);

impl Shape for InstanceId {
    const COLUMNS: Columns = Columns::InstanceIds;

    fn scan(row: &PgRow) -> Result<Self, Error> {
        Ok(Self(row.try_get(0)?))
    }
}

/// A value bound to a numbered placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Bind {
    Text(String),
    TextList(Vec<String>),
    BigInt(i64),
    Timestamp(DateTime<Utc>),
}

impl Bind {
    pub(crate) fn bind_to<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            Self::Text(value) => query.bind(value),
            Self::TextList(values) => query.bind(values),
            Self::BigInt(value) => query.bind(value),
            Self::Timestamp(value) => query.bind(value),
        }
    }
}

/// Output of [`build_query`].
pub(crate) struct CompiledQuery<T> {
    pub sql: String,
    pub limit: u64,
    pub values: Vec<Bind>,
    pub scan: fn(&PgRow) -> Result<T, Error>,
}

/// Compile `factory` for result shape `T`.
///
/// The factory's column selection is replaced by `T::COLUMNS`. A
/// time-travel clause is only rendered when both `allow_time_travel` and the
/// context permit it.
pub(crate) fn build_query<T: Shape>(
    ctx: &CallContext,
    dialect: Dialect,
    factory: &SearchQueryFactory,
    allow_time_travel: bool,
) -> Result<CompiledQuery<T>, eventstore_core::Error> {
    let query = factory.clone().columns(T::COLUMNS).build().map_err(build_error)?;

    let mut sql = select_template(query.columns).to_string();
    if allow_time_travel && ctx.time_travel() {
        sql.push_str(&dialect.time_travel(ctx.took()));
    }

    let (condition, mut values) = prepare_condition(&query)?;
    sql.push_str(&condition);

    if query.columns == Columns::Event {
        sql.push_str(" ORDER BY event_sequence");
        if query.desc {
            sql.push_str(" DESC");
        }
    }
    if query.limit > 0 {
        sql.push_str(" LIMIT ?");
        values.push(Bind::BigInt(sequence_to_db(query.limit)?));
    }

    Ok(CompiledQuery {
        sql: number_placeholder(&sql, "?", dialect.placeholder()),
        limit: query.limit,
        values,
        scan: T::scan,
    })
}

const fn select_template(columns: Columns) -> &'static str {
    match columns {
        Columns::Event => {
            "SELECT creation_date, event_type, event_sequence, previous_aggregate_sequence, \
             event_data::TEXT AS event_data, editor_service, editor_user, resource_owner, \
             instance_id, aggregate_type, aggregate_id, aggregate_version FROM eventstore.events"
        }
        Columns::MaxSequence => "SELECT MAX(event_sequence) FROM eventstore.events",
        Columns::InstanceIds => "SELECT DISTINCT instance_id FROM eventstore.events",
    }
}

fn prepare_condition(query: &SearchQuery) -> Result<(String, Vec<Bind>), eventstore_core::Error> {
    let mut values = Vec::new();
    let mut clauses = Vec::with_capacity(query.filters.len());

    for conjunction in query.filters.iter() {
        if conjunction.is_empty() {
            clauses.push("( TRUE )".to_string());
            continue;
        }
        let mut sub_clauses = Vec::with_capacity(conjunction.len());
        for filter in conjunction {
            let (clause, value) = prepare_filter(filter)?;
            sub_clauses.push(clause);
            values.push(value);
        }
        clauses.push(format!("( {} )", sub_clauses.join(" AND ")));
    }

    Ok((format!(" WHERE {}", clauses.join(" OR ")), values))
}

fn prepare_filter(filter: &Filter) -> Result<(String, Bind), eventstore_core::Error> {
    let column = column_name(filter.field);
    let op = operator(filter.operation);
    let clause = match filter.operation {
        Operation::In => format!("{column} {op} ANY(?)"),
        Operation::NotIn => format!("{column} {op} ALL(?)"),
        Operation::Equals | Operation::Greater | Operation::Less => format!("{column} {op} ?"),
    };
    let value = match &filter.value {
        FilterValue::Text(text) => Bind::Text(text.clone()),
        FilterValue::TextList(list) => Bind::TextList(list.clone()),
        FilterValue::Sequence(sequence) => Bind::BigInt(sequence_to_db(*sequence)?),
        FilterValue::Timestamp(timestamp) => Bind::Timestamp(*timestamp),
    };
    Ok((clause, value))
}

const fn column_name(field: Field) -> &'static str {
    match field {
        Field::AggregateType => "aggregate_type",
        Field::AggregateId => "aggregate_id",
        Field::Sequence => "event_sequence",
        Field::ResourceOwner => "resource_owner",
        Field::EditorService => "editor_service",
        Field::EditorUser => "editor_user",
        Field::EventType => "event_type",
        Field::CreationDate => "creation_date",
        Field::InstanceId => "instance_id",
    }
}

const fn operator(operation: Operation) -> &'static str {
    match operation {
        Operation::Equals | Operation::In => "=",
        Operation::Greater => ">",
        Operation::Less => "<",
        Operation::NotIn => "<>",
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn compile<T: Shape>(factory: &SearchQueryFactory) -> CompiledQuery<T> {
        build_query(&CallContext::new(), Dialect::Postgres, factory, true).unwrap()
    }

    #[test]
    fn event_query_selects_all_columns_in_order() {
        let factory = SearchQueryFactory::new()
            .add_query()
            .aggregate_ids(["u1"])
            .factory();
        let compiled = compile::<Event>(&factory);
        assert_eq!(
            compiled.sql,
            "SELECT creation_date, event_type, event_sequence, previous_aggregate_sequence, \
             event_data::TEXT AS event_data, editor_service, editor_user, resource_owner, \
             instance_id, aggregate_type, aggregate_id, aggregate_version FROM eventstore.events WHERE ( \
             aggregate_id = $1 ) ORDER BY event_sequence"
        );
        assert_eq!(compiled.values, vec![Bind::Text("u1".to_string())]);
    }

    #[test]
    fn disjunction_of_conjunctions_with_limit() {
        let factory = SearchQueryFactory::new()
            .order_desc()
            .limit(10)
            .add_query()
            .aggregate_types(["user"])
            .aggregate_ids(["a", "b"])
            .or()
            .ignored_instance_ids(["i1"])
            .sequence_greater(5)
            .factory();
        let compiled = compile::<Event>(&factory);

        assert!(compiled.sql.ends_with(
            " WHERE ( aggregate_type = $1 AND aggregate_id = ANY($2) ) OR ( event_sequence < $3 \
             AND instance_id <> ALL($4) ) ORDER BY event_sequence DESC LIMIT $5"
        ));
        assert_eq!(
            compiled.values,
            vec![
                Bind::Text("user".to_string()),
                Bind::TextList(vec!["a".to_string(), "b".to_string()]),
                Bind::BigInt(5),
                Bind::TextList(vec!["i1".to_string()]),
                Bind::BigInt(10),
            ]
        );
        assert_eq!(compiled.limit, 10);
    }

    #[test]
    fn max_sequence_has_no_order_by() {
        let factory = SearchQueryFactory::new()
            .add_query()
            .aggregate_types(["user"])
            .factory();
        let compiled = compile::<MaxSequence>(&factory);
        assert_eq!(
            compiled.sql,
            "SELECT MAX(event_sequence) FROM eventstore.events WHERE ( aggregate_type = $1 )"
        );
    }

    #[test]
    fn instance_ids_select_distinct() {
        let factory = SearchQueryFactory::new().add_query().factory();
        let compiled = compile::<InstanceId>(&factory);
        assert_eq!(
            compiled.sql,
            "SELECT DISTINCT instance_id FROM eventstore.events WHERE ( TRUE )"
        );
        assert!(compiled.values.is_empty());
    }

    #[test]
    fn creation_date_binds_timestamp() {
        let date = Utc::now();
        let factory = SearchQueryFactory::new()
            .add_query()
            .creation_date_newer(date)
            .factory();
        let compiled = compile::<Event>(&factory);
        assert!(compiled.sql.contains("( creation_date > $1 )"));
        assert_eq!(compiled.values, vec![Bind::Timestamp(date)]);
    }

    #[test]
    fn empty_factory_is_invalid_argument() {
        let err = build_query::<Event>(
            &CallContext::new(),
            Dialect::Postgres,
            &SearchQueryFactory::new(),
            true,
        )
        .err()
        .unwrap();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn time_travel_requires_context_and_caller_permission() {
        let factory = SearchQueryFactory::new().add_query().aggregate_ids(["u1"]).factory();
        let ctx = CallContext::new().allow_time_travel();
        std::thread::sleep(Duration::from_millis(1));

        let travelled = build_query::<Event>(&ctx, Dialect::Cockroach, &factory, true).unwrap();
        assert!(travelled.sql.contains("FROM eventstore.events AS OF SYSTEM TIME '-"));
        assert!(travelled.sql.contains("us' WHERE"));

        let in_tx = build_query::<Event>(&ctx, Dialect::Cockroach, &factory, false).unwrap();
        assert!(!in_tx.sql.contains("AS OF SYSTEM TIME"));

        let plain = build_query::<Event>(&CallContext::new(), Dialect::Cockroach, &factory, true)
            .unwrap();
        assert!(!plain.sql.contains("AS OF SYSTEM TIME"));

        let postgres = build_query::<Event>(&ctx, Dialect::Postgres, &factory, true).unwrap();
        assert!(!postgres.sql.contains("AS OF SYSTEM TIME"));
    }
}
