use futures::TryStreamExt;
use sqlx::PgConnection;

use crate::{error::Error, query::CompiledQuery};

/// Execute a compiled query and scan every row.
pub(crate) async fn fetch_all<T>(
    conn: &mut PgConnection,
    query: CompiledQuery<T>,
) -> Result<Vec<T>, Error> {
    let CompiledQuery {
        sql,
        limit,
        values,
        scan,
    } = query;
    tracing::trace!(%sql, values = values.len(), "executing query");

    let mut statement = sqlx::query(&sql);
    for value in values {
        statement = value.bind_to(statement);
    }

    let mut out = match usize::try_from(limit) {
        Ok(limit) if limit > 0 => Vec::with_capacity(limit.min(PREALLOCATE_MAX)),
        _ => Vec::new(),
    };
    let mut rows = statement.fetch(conn);
    while let Some(row) = rows.try_next().await? {
        out.push(scan(&row)?);
    }
    Ok(out)
}

const PREALLOCATE_MAX: usize = 1024;
