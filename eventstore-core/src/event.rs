//! Events: immutable facts appended to an aggregate's stream.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{error::Error, version::Version};

/// Name of an event, e.g. `user.added`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

/// Name of an aggregate, e.g. `user`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateType(String);

macro_rules! string_newtype {
    ($name:ident) => {
        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_newtype!(EventType);
string_newtype!(AggregateType);

/// A single event, either pending inside an
/// [`Aggregate`](crate::aggregate::Aggregate) or read back from the store.
///
/// `sequence` and `creation_date` are assigned by storage on push and written
/// back onto the pending event. The payload is kept as raw JSON bytes; typed
/// decoding is done by the consumer through [`Event::unmarshal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub sequence: u64,
    /// Ordering tie-breaker. Mirrors `sequence` for events in this store.
    pub position: u64,
    /// Sequence of the aggregate stream before this event was appended. Zero
    /// for the first event of a stream.
    pub previous_sequence: u64,
    pub creation_date: DateTime<Utc>,
    pub event_type: EventType,
    pub data: Option<Vec<u8>>,
    pub editor_service: String,
    pub editor_user: String,
    pub resource_owner: String,
    pub instance_id: String,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub aggregate_version: Version,
}

impl Event {
    /// Check the structural invariants every event must satisfy before it
    /// is written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] naming the first missing field.
    pub fn validate(&self) -> Result<(), Error> {
        let missing = if self.event_type.is_empty() {
            Some("event type")
        } else if self.aggregate_id.is_empty() {
            Some("aggregate id")
        } else if self.aggregate_type.is_empty() {
            Some("aggregate type")
        } else if !self.aggregate_version.is_valid() {
            return Err(Error::precondition_failed(format!(
                "event {} has invalid aggregate version {:?}",
                self.event_type, self.aggregate_version.as_str()
            )));
        } else if self.editor_service.is_empty() {
            Some("editor service")
        } else if self.editor_user.is_empty() {
            Some("editor user")
        } else if self.resource_owner.is_empty() {
            Some("resource owner")
        } else {
            None
        };

        match missing {
            Some(field) => Err(Error::precondition_failed(format!("event {field} is missing"))),
            None => Ok(()),
        }
    }

    /// Decode the JSON payload into `T`.
    ///
    /// An event without payload decodes as JSON `null`, so `Option<T>` and
    /// `()` targets succeed on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the payload does not match `T`.
    pub fn unmarshal<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let result = match self.data.as_deref() {
            Some(data) if !data.is_empty() => serde_json::from_slice(data),
            _ => serde_json::from_value(serde_json::Value::Null),
        };
        result.map_err(|e| {
            Error::invalid_argument(format!("unable to unmarshal event {}", self.event_type))
                .with_source(e)
        })
    }
}
