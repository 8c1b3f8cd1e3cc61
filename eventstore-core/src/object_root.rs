use chrono::{DateTime, Utc};

use crate::{error::Error, event::Event, sdk::AppendEvents};

/// Last-known state common to every read-model folded from one aggregate.
///
/// Embed it in a read-model and forward events to [`ObjectRoot::append_event`]
/// to keep id, owner, sequence and timestamps current.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectRoot {
    pub aggregate_id: String,
    pub resource_owner: String,
    pub instance_id: String,
    pub sequence: u64,
    /// Creation date of the first folded event.
    pub creation_date: Option<DateTime<Utc>>,
    /// Creation date of the latest folded event.
    pub change_date: Option<DateTime<Utc>>,
}

impl ObjectRoot {
    #[must_use]
    pub fn new(aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            ..Self::default()
        }
    }

    /// Fold `event` into the root.
    ///
    /// The first event fixes the aggregate id; events of another aggregate are
    /// ignored.
    pub fn append_event(&mut self, event: &Event) {
        if self.aggregate_id.is_empty() {
            self.aggregate_id.clone_from(&event.aggregate_id);
        } else if self.aggregate_id != event.aggregate_id {
            return;
        }
        if self.resource_owner.is_empty() {
            self.resource_owner.clone_from(&event.resource_owner);
        }
        if self.instance_id.is_empty() {
            self.instance_id.clone_from(&event.instance_id);
        }

        self.change_date = Some(event.creation_date);
        if self.creation_date.is_none() {
            self.creation_date = Some(event.creation_date);
        }
        self.sequence = event.sequence;
    }

    /// `true` until the first event has been folded.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.sequence == 0
    }
}

impl AppendEvents for ObjectRoot {
    fn append_events(&mut self, events: &[Event]) -> Result<(), Error> {
        for event in events {
            self.append_event(event);
        }
        Ok(())
    }
}
