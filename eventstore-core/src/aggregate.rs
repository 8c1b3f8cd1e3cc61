//! Aggregates: the unit of an optimistic-concurrency write.
//!
//! An [`Aggregate`] collects pending [`Event`]s for one stream together with
//! the sequence the caller last observed for that stream. Pushing it through an
//! [`EventStore`](crate::store::EventStore) appends the events only if the
//! stream has not moved in the meantime.
//!
//! Aggregates are built with [`AggregateCreator::new_aggregate`], which stamps
//! the caller identity from the [`CallContext`] and validates the result.

use std::{fmt, sync::Arc};

use chrono::Utc;
use serde::Serialize;

use crate::{
    context::CallContext,
    error::{BoxError, Error},
    event::{AggregateType, Event, EventType},
    query::SearchQueryFactory,
    version::Version,
};

/// Callback deciding whether a push may proceed, given the events matched by
/// the precondition query.
pub type Validation = Arc<dyn Fn(&[Event]) -> Result<(), BoxError> + Send + Sync>;

/// Read-and-validate check executed inside the push transaction before the
/// aggregate's events are inserted.
#[derive(Clone)]
pub struct Precondition {
    pub query: SearchQueryFactory,
    pub validation: Validation,
}

impl Precondition {
    pub fn new<F>(query: SearchQueryFactory, validation: F) -> Self
    where
        F: Fn(&[Event]) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            query,
            validation: Arc::new(validation),
        }
    }
}

impl fmt::Debug for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Precondition")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

/// Pending write for a single aggregate stream.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub id: String,
    pub aggregate_type: AggregateType,
    pub version: Version,
    /// Sequence the caller believes is the current tip of the stream. Zero
    /// means the stream is expected to be empty.
    pub previous_sequence: u64,
    pub editor_service: String,
    pub editor_user: String,
    pub resource_owner: String,
    pub instance_id: String,
    pub events: Vec<Event>,
    pub precondition: Option<Precondition>,
}

impl Aggregate {
    /// Append a new event carrying this aggregate's identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `event_type` is empty or the
    /// payload cannot be serialised to JSON.
    pub fn append_event(
        &mut self,
        event_type: impl Into<EventType>,
        payload: impl IntoPayload,
    ) -> Result<&mut Self, Error> {
        let event_type = event_type.into();
        if event_type.is_empty() {
            return Err(Error::invalid_argument("event type must not be empty"));
        }
        let data = payload.into_payload().map_err(|e| {
            Error::invalid_argument(format!("unable to marshal payload of {event_type}"))
                .with_source(e)
        })?;

        self.events.push(Event {
            sequence: 0,
            position: 0,
            previous_sequence: self.previous_sequence,
            creation_date: Utc::now(),
            event_type,
            data,
            editor_service: self.editor_service.clone(),
            editor_user: self.editor_user.clone(),
            resource_owner: self.resource_owner.clone(),
            instance_id: self.instance_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.id.clone(),
            aggregate_version: self.version.clone(),
        });
        Ok(self)
    }

    /// Guard the push of this aggregate with a read-and-validate check.
    pub fn set_precondition<F>(&mut self, query: SearchQueryFactory, validation: F) -> &mut Self
    where
        F: Fn(&[Event]) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.precondition = Some(Precondition::new(query, validation));
        self
    }

    /// Check the structural invariants of the aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if an identity or editor field is
    /// empty, the version is not `vMAJOR[.MINOR[.PATCH]]`, or the precondition
    /// query cannot be built.
    pub fn validate(&self) -> Result<(), Error> {
        let required = [
            ("id", self.id.as_str()),
            ("type", self.aggregate_type.as_str()),
            ("editor service", self.editor_service.as_str()),
            ("editor user", self.editor_user.as_str()),
            ("resource owner", self.resource_owner.as_str()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(Error::precondition_failed(format!("aggregate {field} is missing")));
        }
        if !self.version.is_valid() {
            return Err(Error::precondition_failed(format!(
                "aggregate version {:?} is not of the form vMAJOR[.MINOR[.PATCH]]",
                self.version.as_str()
            )));
        }
        if let Some(precondition) = &self.precondition {
            precondition.query.build().map_err(|e| {
                Error::precondition_failed("aggregate precondition is invalid").with_source(e)
            })?;
        }
        Ok(())
    }
}

/// Conversion of an event payload into raw JSON bytes.
///
/// `None` means the event carries no payload.
pub trait IntoPayload {
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented as JSON.
    fn into_payload(self) -> Result<Option<Vec<u8>>, BoxError>;
}

impl IntoPayload for () {
    fn into_payload(self) -> Result<Option<Vec<u8>>, BoxError> {
        Ok(None)
    }
}

/// Raw bytes are stored as-is after checking they are valid JSON.
impl IntoPayload for Vec<u8> {
    fn into_payload(self) -> Result<Option<Vec<u8>>, BoxError> {
        if self.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice::<serde::de::IgnoredAny>(&self)?;
        Ok(Some(self))
    }
}

impl IntoPayload for &[u8] {
    fn into_payload(self) -> Result<Option<Vec<u8>>, BoxError> {
        self.to_vec().into_payload()
    }
}

impl IntoPayload for serde_json::Value {
    fn into_payload(self) -> Result<Option<Vec<u8>>, BoxError> {
        if self.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_vec(&self)?))
    }
}

impl IntoPayload for serde_json::Map<String, serde_json::Value> {
    fn into_payload(self) -> Result<Option<Vec<u8>>, BoxError> {
        Ok(Some(serde_json::to_vec(&self)?))
    }
}

impl<P: IntoPayload> IntoPayload for Option<P> {
    fn into_payload(self) -> Result<Option<Vec<u8>>, BoxError> {
        self.map_or(Ok(None), IntoPayload::into_payload)
    }
}

/// Wrapper serialising any [`Serialize`] value as the payload.
///
/// ```
/// use eventstore_core::aggregate::{IntoPayload, Json};
///
/// #[derive(serde::Serialize)]
/// struct Added {
///     name: &'static str,
/// }
///
/// let bytes = Json(&Added { name: "ada" }).into_payload().unwrap();
/// assert_eq!(bytes.as_deref(), Some(&br#"{"name":"ada"}"#[..]));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoPayload for Json<T> {
    fn into_payload(self) -> Result<Option<Vec<u8>>, BoxError> {
        Ok(Some(serde_json::to_vec(&self.0)?))
    }
}

/// Overrides applied by [`AggregateCreator::new_aggregate`] on top of the
/// identity carried by the [`CallContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateOption {
    OverwriteEditorUser(String),
    OverwriteResourceOwner(String),
}

/// Write on behalf of another user than the caller.
#[must_use]
pub fn overwrite_editor_user(user_id: impl Into<String>) -> AggregateOption {
    AggregateOption::OverwriteEditorUser(user_id.into())
}

/// Write into another organisation than the caller's.
#[must_use]
pub fn overwrite_resource_owner(org_id: impl Into<String>) -> AggregateOption {
    AggregateOption::OverwriteResourceOwner(org_id.into())
}

/// Factory for [`Aggregate`]s, bound to the name of the service that edits
/// them.
#[derive(Debug, Clone)]
pub struct AggregateCreator {
    service_name: String,
}

impl AggregateCreator {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Create a validated aggregate with the editor and owner taken from
    /// `ctx`, adjusted by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if the resulting aggregate fails
    /// [`Aggregate::validate`].
    pub fn new_aggregate(
        &self,
        ctx: &CallContext,
        id: impl Into<String>,
        aggregate_type: impl Into<AggregateType>,
        version: impl Into<String>,
        previous_sequence: u64,
        options: impl IntoIterator<Item = AggregateOption>,
    ) -> Result<Aggregate, Error> {
        let mut aggregate = Aggregate {
            id: id.into(),
            aggregate_type: aggregate_type.into(),
            version: Version::unchecked(version.into()),
            previous_sequence,
            editor_service: self.service_name.clone(),
            editor_user: ctx.user_id().to_string(),
            resource_owner: ctx.org_id().to_string(),
            instance_id: ctx.instance_id().to_string(),
            events: Vec::new(),
            precondition: None,
        };

        for option in options {
            match option {
                AggregateOption::OverwriteEditorUser(user) => aggregate.editor_user = user,
                AggregateOption::OverwriteResourceOwner(org) => aggregate.resource_owner = org,
            }
        }

        aggregate.validate()?;
        Ok(aggregate)
    }
}
