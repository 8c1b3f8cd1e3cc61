use std::time::Duration;

use serde::Deserialize;

/// SQL flavour of the backing database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    Cockroach,
}

impl Dialect {
    /// Prefix of numbered placeholders.
    #[must_use]
    pub const fn placeholder(self) -> &'static str {
        match self {
            Self::Postgres | Self::Cockroach => "$",
        }
    }

    /// Clause reading from a snapshot `took` in the past, placed right after
    /// the table name. Empty when the dialect has no such clause.
    #[must_use]
    pub fn time_travel(self, took: Duration) -> String {
        match self {
            Self::Postgres => String::new(),
            Self::Cockroach if took.is_zero() => String::new(),
            Self::Cockroach => format!(" AS OF SYSTEM TIME '-{}us'", took.as_micros()),
        }
    }
}

/// Replace every occurrence of `old` in `query`, left to right, with `new`
/// followed by its 1-based position.
///
/// ```
/// use eventstore_postgres::dialect::number_placeholder;
///
/// assert_eq!(number_placeholder("a=? AND b=?", "?", "$"), "a=$1 AND b=$2");
/// ```
#[must_use]
pub fn number_placeholder(query: &str, old: &str, new: &str) -> String {
    if old.is_empty() {
        return query.to_string();
    }
    let mut numbered = String::with_capacity(query.len() + 8);
    for (index, part) in query.split(old).enumerate() {
        if index > 0 {
            numbered.push_str(new);
            numbered.push_str(&index.to_string());
        }
        numbered.push_str(part);
    }
    numbered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_placeholders_left_to_right() {
        assert_eq!(number_placeholder("a=? AND b=?", "?", "$"), "a=$1 AND b=$2");
    }

    #[test]
    fn query_without_placeholder_is_unchanged() {
        assert_eq!(number_placeholder("SELECT 1", "?", "$"), "SELECT 1");
        assert_eq!(number_placeholder("a=?", "", "$"), "a=?");
    }

    #[test]
    fn numbers_past_nine() {
        let query = vec!["?"; 11].join(",");
        let numbered = number_placeholder(&query, "?", "$");
        assert!(numbered.ends_with("$10,$11"));
    }

    #[test]
    fn cockroach_renders_as_of_system_time() {
        assert_eq!(
            Dialect::Cockroach.time_travel(Duration::from_millis(150)),
            " AS OF SYSTEM TIME '-150000us'"
        );
        assert_eq!(Dialect::Cockroach.time_travel(Duration::ZERO), "");
        assert_eq!(Dialect::Postgres.time_travel(Duration::from_secs(1)), "");
    }
}
