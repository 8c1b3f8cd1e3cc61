//! Per-call context: caller identity, timing and read options.

use std::time::{Duration, Instant};

/// Context passed to every store operation.
///
/// Carries the identity of the caller (used by
/// [`AggregateCreator`](crate::aggregate::AggregateCreator) to stamp editor and
/// owner fields), the instant the call started, an optional deadline, and
/// whether reads may use a historical snapshot.
#[derive(Debug, Clone)]
pub struct CallContext {
    user_id: String,
    org_id: String,
    instance_id: String,
    started: Instant,
    deadline: Option<Instant>,
    time_travel: bool,
}

impl CallContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_id: String::new(),
            org_id: String::new(),
            instance_id: String::new(),
            started: Instant::now(),
            deadline: None,
            time_travel: false,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Organisation of the caller. Becomes the resource owner of aggregates
    /// created through this context.
    #[must_use]
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self
    }

    #[must_use]
    pub fn with_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Set a deadline relative to the start of the call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(self.started + timeout);
        self
    }

    /// Allow reads to be served from a snapshot taken when the call started.
    #[must_use]
    pub const fn allow_time_travel(mut self) -> Self {
        self.time_travel = true;
        self
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub const fn time_travel(&self) -> bool {
        self.time_travel
    }

    /// Time elapsed since the call started.
    #[must_use]
    pub fn took(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left until the deadline. `None` when no deadline was set;
    /// `Some(Duration::ZERO)` once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
