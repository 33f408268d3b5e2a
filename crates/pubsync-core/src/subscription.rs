//! Subscriptions binding one session to one publication.
//!
//! Lifecycle: `Created` → `Snapshotting` → `Live` → `Terminated`.
//! A subscription to a name with no registered publication stays `Created`
//! and never receives data. Termination only happens when the owning
//! session goes away.

use crate::document::{Diff, Documents, Fields};
use crate::filter::{BoundFilter, PredicateBundle};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Destination for the events of one subscription.
///
/// Implementations serialize the event and hand it to the owning
/// connection. They must not block.
pub trait EventSink: Send + Sync {
    /// A document became visible.
    ///
    /// # Errors
    ///
    /// Returns error if the event cannot be handed to the connection.
    fn added(&self, collection: &str, id: &str, fields: &Fields) -> Result<(), DeliveryError>;

    /// A visible document changed.
    ///
    /// # Errors
    ///
    /// Returns error if the event cannot be handed to the connection.
    fn changed(&self, collection: &str, diff: &Diff) -> Result<(), DeliveryError>;

    /// A visible document was removed.
    ///
    /// # Errors
    ///
    /// Returns error if the event cannot be handed to the connection.
    fn removed(&self, collection: &str, id: &str) -> Result<(), DeliveryError>;
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Instantiated, not yet attached to a publication
    Created,
    /// Initial snapshot is being delivered
    Snapshotting,
    /// Receiving filtered live events
    Live,
    /// Owning session closed
    Terminated,
}

/// One session's live binding to a publication.
pub struct Subscription {
    session: String,
    request_id: Value,
    publication: String,
    filter: BoundFilter,
    sink: Arc<dyn EventSink>,
    state: Mutex<SubscriptionState>,
}

impl Subscription {
    /// Create a subscription, resolving the publication's predicates
    /// against `params`. Without a bundle every predicate passes.
    #[must_use]
    pub fn new(
        session: impl Into<String>,
        request_id: impl Into<Value>,
        publication: impl Into<String>,
        params: &Value,
        bundle: Option<&PredicateBundle>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let filter = bundle.map_or_else(|| BoundFilter::pass_all(params), |b| b.bind(params));
        Self {
            session: session.into(),
            request_id: request_id.into(),
            publication: publication.into(),
            filter,
            sink,
            state: Mutex::new(SubscriptionState::Created),
        }
    }

    /// Owning session identifier.
    #[must_use]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Id of the `sub` request that created this subscription.
    #[must_use]
    pub fn request_id(&self) -> &Value {
        &self.request_id
    }

    /// Publication name.
    #[must_use]
    pub fn publication(&self) -> &str {
        &self.publication
    }

    /// Subscriber-supplied params.
    #[must_use]
    pub fn params(&self) -> &Value {
        self.filter.params()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Mark the subscription terminated. No further events are delivered.
    pub fn terminate(&self) {
        *self.state.lock() = SubscriptionState::Terminated;
    }

    pub(crate) fn set_state(&self, state: SubscriptionState) {
        let mut current = self.state.lock();
        if *current != SubscriptionState::Terminated {
            *current = state;
        }
    }

    fn is_terminated(&self) -> bool {
        self.state() == SubscriptionState::Terminated
    }

    /// Deliver the snapshot. Add visibility is not consulted here.
    ///
    /// Returns the number of documents sent.
    pub(crate) fn deliver_snapshot(&self, documents: &Documents) -> usize {
        let Some(selected) = self.evaluate("snapshot", |filter| filter.select_snapshot(documents))
        else {
            return 0;
        };

        let mut sent = 0;
        for (id, fields) in &selected {
            if self.deliver(self.sink.added(&self.publication, id, fields)) {
                sent += 1;
            }
        }
        sent
    }

    pub(crate) fn notify_added(&self, id: &str, fields: &Fields) {
        if self.is_terminated() {
            return;
        }
        if self.evaluate("added", |filter| filter.is_added_visible(id, fields)) == Some(true) {
            self.deliver(self.sink.added(&self.publication, id, fields));
        }
    }

    pub(crate) fn notify_changed(&self, diff: &Diff) {
        if self.is_terminated() {
            return;
        }
        let visible = self.evaluate("changed", |filter| {
            filter.is_changed_visible(&diff.id, &diff.changed, &self.publication)
        });
        if visible == Some(true) {
            self.deliver(self.sink.changed(&self.publication, diff));
        }
    }

    pub(crate) fn notify_removed(&self, id: &str) {
        if self.is_terminated() {
            return;
        }
        if self.evaluate("removed", |filter| filter.is_removed_visible(id)) == Some(true) {
            self.deliver(self.sink.removed(&self.publication, id));
        }
    }

    /// Run a predicate, turning a panic into `None` so fan-out can skip
    /// this subscriber and carry on.
    fn evaluate<T>(&self, event: &'static str, check: impl FnOnce(&BoundFilter) -> T) -> Option<T> {
        if let Ok(value) = panic::catch_unwind(AssertUnwindSafe(|| check(&self.filter))) {
            Some(value)
        } else {
            tracing::warn!(
                session = %self.session,
                publication = %self.publication,
                event,
                "Predicate panicked, skipping subscriber"
            );
            None
        }
    }

    fn deliver(&self, outcome: Result<(), DeliveryError>) -> bool {
        match outcome {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(
                    session = %self.session,
                    publication = %self.publication,
                    error = %err,
                    "Dropped event for subscriber"
                );
                false
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("session", &self.session)
            .field("request_id", &self.request_id)
            .field("publication", &self.publication)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Errors handing an event to a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection's outbound channel is gone
    #[error("connection closed")]
    Closed,
}
