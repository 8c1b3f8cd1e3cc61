//! Single predicates over event columns.

use chrono::{DateTime, Utc};

use crate::{error::Error, event::Event};

/// Event attribute a [`Filter`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    AggregateType,
    AggregateId,
    Sequence,
    ResourceOwner,
    EditorService,
    EditorUser,
    EventType,
    CreationDate,
    InstanceId,
}

/// Comparison a [`Filter`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Equals,
    /// Matches if the field equals any element of a list.
    In,
    /// Matches if the field equals no element of a list.
    NotIn,
    Greater,
    Less,
}

/// Value side of a [`Filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    TextList(Vec<String>),
    Sequence(u64),
    Timestamp(DateTime<Utc>),
}

/// A `(field, operation, value)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: Field,
    pub operation: Operation,
    pub value: FilterValue,
}

impl Filter {
    #[must_use]
    pub const fn new(field: Field, operation: Operation, value: FilterValue) -> Self {
        Self {
            field,
            operation,
            value,
        }
    }

    /// Check that operation and value agree.
    ///
    /// `In`/`NotIn` need a non-empty list, `Greater`/`Less` need an ordered
    /// value (sequence or timestamp), `Equals` needs a scalar.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] on mismatch.
    pub fn validate(&self) -> Result<(), Error> {
        let ok = match (self.operation, &self.value) {
            (Operation::In | Operation::NotIn, FilterValue::TextList(list)) => !list.is_empty(),
            (Operation::In | Operation::NotIn, _) => false,
            (Operation::Greater | Operation::Less, value) => {
                matches!(value, FilterValue::Sequence(_) | FilterValue::Timestamp(_))
            }
            (Operation::Equals, value) => !matches!(value, FilterValue::TextList(_)),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::precondition_failed(format!(
                "filter {:?} {:?} has an incompatible value",
                self.field, self.operation
            )))
        }
    }

    /// Evaluate the filter against an event in memory.
    ///
    /// A value whose type does not fit the field never matches.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match (self.field, &self.value) {
            (Field::Sequence, FilterValue::Sequence(value)) => {
                compare(self.operation, &event.sequence, value)
            }
            (Field::CreationDate, FilterValue::Timestamp(value)) => {
                compare(self.operation, &event.creation_date, value)
            }
            (Field::Sequence | Field::CreationDate, _) => false,
            (field, value) => {
                let Some(actual) = text_field(field, event) else {
                    return false;
                };
                match (self.operation, value) {
                    (Operation::Equals, FilterValue::Text(expected)) => actual == expected,
                    (Operation::In, FilterValue::TextList(list)) => {
                        list.iter().any(|item| item == actual)
                    }
                    (Operation::NotIn, FilterValue::TextList(list)) => {
                        list.iter().all(|item| item != actual)
                    }
                    _ => false,
                }
            }
        }
    }
}

fn compare<T: PartialOrd>(operation: Operation, actual: &T, expected: &T) -> bool {
    match operation {
        Operation::Equals | Operation::In => actual == expected,
        Operation::NotIn => actual != expected,
        Operation::Greater => actual > expected,
        Operation::Less => actual < expected,
    }
}

fn text_field(field: Field, event: &Event) -> Option<&str> {
    Some(match field {
        Field::AggregateType => event.aggregate_type.as_str(),
        Field::AggregateId => &event.aggregate_id,
        Field::ResourceOwner => &event.resource_owner,
        Field::EditorService => &event.editor_service,
        Field::EditorUser => &event.editor_user,
        Field::EventType => event.event_type.as_str(),
        Field::InstanceId => &event.instance_id,
        Field::Sequence | Field::CreationDate => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{AggregateType, EventType},
        version::Version,
    };

    fn event() -> Event {
        Event {
            sequence: 5,
            position: 5,
            previous_sequence: 4,
            creation_date: Utc::now(),
            event_type: EventType::new("user.added"),
            data: None,
            editor_service: "svc".to_string(),
            editor_user: "editor".to_string(),
            resource_owner: "org".to_string(),
            instance_id: "instance".to_string(),
            aggregate_type: AggregateType::new("user"),
            aggregate_id: "u1".to_string(),
            aggregate_version: Version::unchecked("v1".to_string()),
        }
    }

    fn list(items: &[&str]) -> FilterValue {
        FilterValue::TextList(items.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn validate_requires_list_for_in() {
        let filter = Filter::new(
            Field::AggregateId,
            Operation::In,
            FilterValue::Text("u1".to_string()),
        );
        assert!(filter.validate().unwrap_err().is_precondition_failed());
        assert!(Filter::new(Field::AggregateId, Operation::In, list(&[])).validate().is_err());
        assert!(Filter::new(Field::AggregateId, Operation::In, list(&["u1"])).validate().is_ok());
    }

    #[test]
    fn validate_requires_ordered_value_for_greater() {
        let text = Filter::new(
            Field::Sequence,
            Operation::Greater,
            FilterValue::Text("1".to_string()),
        );
        assert!(text.validate().is_err());
        let seq = Filter::new(Field::Sequence, Operation::Greater, FilterValue::Sequence(1));
        assert!(seq.validate().is_ok());

        let ordered_text = Filter::new(
            Field::AggregateId,
            Operation::Less,
            FilterValue::Text("z".to_string()),
        );
        assert!(ordered_text.validate().is_err());
        assert!(!ordered_text.matches(&event()));
    }

    #[test]
    fn matches_text_fields() {
        let e = event();
        let eq = Filter::new(
            Field::AggregateType,
            Operation::Equals,
            FilterValue::Text("user".to_string()),
        );
        assert!(eq.matches(&e));
        assert!(Filter::new(Field::AggregateId, Operation::In, list(&["u0", "u1"])).matches(&e));
        assert!(!Filter::new(Field::InstanceId, Operation::NotIn, list(&["instance"])).matches(&e));
        assert!(Filter::new(Field::InstanceId, Operation::NotIn, list(&["other"])).matches(&e));
    }

    #[test]
    fn matches_sequence_bounds() {
        let e = event();
        assert!(Filter::new(Field::Sequence, Operation::Greater, FilterValue::Sequence(4)).matches(&e));
        assert!(!Filter::new(Field::Sequence, Operation::Greater, FilterValue::Sequence(5)).matches(&e));
        assert!(Filter::new(Field::Sequence, Operation::Less, FilterValue::Sequence(6)).matches(&e));
    }

    #[test]
    fn matches_creation_date() {
        let e = event();
        let earlier = e.creation_date - chrono::Duration::seconds(1);
        let newer = Filter::new(
            Field::CreationDate,
            Operation::Greater,
            FilterValue::Timestamp(earlier),
        );
        assert!(newer.matches(&e));
    }

    #[test]
    fn mismatched_value_type_never_matches() {
        let e = event();
        let filter = Filter::new(
            Field::Sequence,
            Operation::Equals,
            FilterValue::Text("5".to_string()),
        );
        assert!(!filter.matches(&e));
    }
}
