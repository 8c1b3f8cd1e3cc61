/// Error raised inside a database transaction.
///
/// Kept separate from [`eventstore_core::Error`] so the retry helper can tell
/// serialization failures apart from domain errors. Converted into the public
/// error type at the crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Query execution or transaction failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Validation, precondition or concurrency failure raised while the
    /// transaction was open.
    #[error(transparent)]
    Domain(#[from] eventstore_core::Error),
    /// A sequence read from the database does not fit `u64`.
    #[error("invalid sequence value from database: {0}")]
    InvalidSequence(i64),
}

/// SQLSTATE codes signalling that the transaction may succeed when retried.
const RETRYABLE_CODES: [&str; 2] = [
    // serialization_failure
    "40001",
    // deadlock_detected
    "40P01",
];

impl Error {
    /// `true` if the whole transaction should be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db
                .code()
                .is_some_and(|code| RETRYABLE_CODES.contains(&code.as_ref())),
            _ => false,
        }
    }
}

impl From<Error> for eventstore_core::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Domain(error) => error,
            Error::Database(sqlx::Error::PoolTimedOut) => {
                Self::internal("timed out acquiring a database connection")
                    .with_source(sqlx::Error::PoolTimedOut)
            }
            Error::Database(error) => {
                Self::internal("database operation failed").with_source(error)
            }
            error @ Error::InvalidSequence(_) => {
                Self::internal("unable to read sequence").with_source(error)
            }
        }
    }
}

pub(crate) fn sequence_from_db(value: i64) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| Error::InvalidSequence(value))
}

pub(crate) fn sequence_to_db(value: u64) -> Result<i64, eventstore_core::Error> {
    i64::try_from(value).map_err(|e| {
        eventstore_core::Error::invalid_argument(format!("sequence {value} exceeds BIGINT"))
            .with_source(e)
    })
}
