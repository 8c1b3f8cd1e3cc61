//! Error taxonomy shared by every layer of the eventstore.
//!
//! Callers branch on [`Error::kind`] rather than on individual variants: the
//! kind is stable, while variants carry backend-specific context.

use std::borrow::Cow;

use thiserror::Error;

/// Boxed cause attached to an [`Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller supplied a malformed query or payload.
    InvalidArgument,
    /// Structural validation, precondition rejection or a concurrency
    /// conflict.
    PreconditionFailed,
    /// A read that must return data returned nothing.
    NotFound,
    /// The call ran past its deadline.
    DeadlineExceeded,
    /// Driver, transaction or scan failure not caused by caller input.
    Internal,
}

/// Error returned when the optimistic-concurrency guard rejects a write.
///
/// The stream tip of the aggregate no longer matches the previous sequence the
/// caller built its aggregate from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "concurrency conflict on {aggregate_type}/{aggregate_id}: {} (hint: reload the latest \
     sequence and retry)",
    describe_expected(.expected)
)]
pub struct ConcurrencyConflict {
    pub aggregate_type: String,
    pub aggregate_id: String,
    /// Sequence the caller expected to be the tip. `None` means an empty
    /// stream was expected.
    pub expected: Option<u64>,
}

fn describe_expected(expected: &Option<u64>) -> String {
    match *expected {
        None => "expected new stream, but events already exist".to_string(),
        Some(sequence) => format!("expected stream tip {sequence}, but it has moved"),
    }
}

/// Error type for every eventstore operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {message}")]
    InvalidArgument {
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxError>,
    },
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxError>,
    },
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    #[error("not found: {message}")]
    NotFound { message: Cow<'static, str> },
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("internal error: {message}")]
    Internal {
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            source: None,
        }
    }

    pub fn precondition_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Attach a cause. Variants without a source slot are returned unchanged.
    #[must_use]
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::InvalidArgument { source, .. }
            | Self::PreconditionFailed { source, .. }
            | Self::Internal { source, .. } => *source = Some(cause.into()),
            Self::Conflict(_) | Self::NotFound { .. } | Self::DeadlineExceeded => {}
        }
        self
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::PreconditionFailed { .. } | Self::Conflict(_) => ErrorKind::PreconditionFailed,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidArgument)
    }

    #[must_use]
    pub const fn is_precondition_failed(&self) -> bool {
        matches!(self.kind(), ErrorKind::PreconditionFailed)
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }

    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Internal)
    }
}
