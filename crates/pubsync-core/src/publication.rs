//! Publications: a document store plus its live subscriber set.
//!
//! Mutations go through [`PublicationHandle`] only. Each mutating call
//! updates the store and fans out to every current subscriber while holding
//! the publication lock, so all notifications of one call are enqueued
//! before it returns and subscribe snapshots never straddle a mutation.
//!
//! Predicates run under that lock and must not call back into the same
//! publication, not even to read it.

use crate::document::{compute_diff, Diff, Documents, Fields};
use crate::filter::PredicateBundle;
use crate::subscription::{Subscription, SubscriptionState};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
struct PublicationState {
    documents: Documents,
    /// Live subscriptions keyed by session id
    subscribers: BTreeMap<String, Arc<Subscription>>,
}

struct Publication {
    name: String,
    bundle: PredicateBundle,
    state: Mutex<PublicationState>,
}

/// Handle to a registered publication, used to mutate its documents.
///
/// Cloning is cheap; all clones refer to the same store.
#[derive(Clone)]
pub struct PublicationHandle {
    inner: Arc<Publication>,
}

impl PublicationHandle {
    pub(crate) fn new(name: impl Into<String>, bundle: PredicateBundle) -> Self {
        Self {
            inner: Arc::new(Publication {
                name: name.into(),
                bundle,
                state: Mutex::new(PublicationState::default()),
            }),
        }
    }

    /// Publication name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Predicates registered for this publication.
    #[must_use]
    pub fn bundle(&self) -> &PredicateBundle {
        &self.inner.bundle
    }

    /// Insert or replace a document.
    ///
    /// An unknown id is an add and is broadcast in full. A known id is a
    /// change: the stored document becomes exactly `fields` and the diff is
    /// broadcast, even when it is empty.
    pub fn upsert(&self, id: impl Into<String>, fields: Fields) {
        let id = id.into();
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if let Some(stored) = state.documents.get_mut(&id) {
            let diff = compute_diff(&id, stored, &fields);
            *stored = fields;
            tracing::debug!(
                publication = %self.inner.name,
                id = %diff.id,
                changed = diff.changed.len(),
                cleared = diff.cleared.len(),
                subscribers = state.subscribers.len(),
                "Document changed"
            );
            for subscriber in state.subscribers.values() {
                subscriber.notify_changed(&diff);
            }
        } else {
            tracing::debug!(
                publication = %self.inner.name,
                id = %id,
                subscribers = state.subscribers.len(),
                "Document added"
            );
            for subscriber in state.subscribers.values() {
                subscriber.notify_added(&id, &fields);
            }
            state.documents.insert(id, fields);
        }
    }

    /// Insert or replace a document given as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns error if `document` is not a JSON object.
    pub fn upsert_json(&self, id: impl Into<String>, document: Value) -> Result<(), StoreError> {
        let id = id.into();
        match document {
            Value::Object(fields) => {
                self.upsert(id, fields);
                Ok(())
            }
            _ => Err(StoreError::NotAnObject(id)),
        }
    }

    /// Remove a document and broadcast the removal.
    ///
    /// The removal is broadcast even when the id is not stored, so clients
    /// holding a stale copy drop it. Returns whether a document was stored.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let existed = state.documents.remove(id).is_some();

        tracing::debug!(
            publication = %self.inner.name,
            id,
            existed,
            subscribers = state.subscribers.len(),
            "Document removed"
        );
        for subscriber in state.subscribers.values() {
            subscriber.notify_removed(id);
        }
        existed
    }

    /// Assign a single field, broadcasting it as changed.
    ///
    /// # Errors
    ///
    /// Returns error if the document does not exist.
    pub fn set_field(
        &self,
        id: &str,
        field: impl Into<String>,
        value: Value,
    ) -> Result<(), StoreError> {
        let field = field.into();
        self.update(id, |fields| {
            fields.insert(field.clone(), value.clone());
            Diff::set(id, field, value)
        })
    }

    /// Delete a single field, broadcasting it as cleared.
    ///
    /// # Errors
    ///
    /// Returns error if the document does not exist.
    pub fn unset_field(&self, id: &str, field: &str) -> Result<(), StoreError> {
        self.update(id, |fields| {
            fields.remove(field);
            Diff::unset(id, field)
        })
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut Fields) -> Diff) -> Result<(), StoreError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let stored = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownDocument(id.to_string()))?;

        let diff = apply(stored);
        for subscriber in state.subscribers.values() {
            subscriber.notify_changed(&diff);
        }
        Ok(())
    }

    /// Copy of a stored document.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Fields> {
        self.inner.state.lock().documents.get(id).cloned()
    }

    /// Ids of all stored documents, in order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.inner.state.lock().documents.keys().cloned().collect()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().documents.len()
    }

    /// Check whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().documents.is_empty()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    /// Deliver the snapshot to `subscription` and make it live.
    ///
    /// An earlier subscription of the same session is replaced and
    /// terminated. Returns the number of snapshot documents sent.
    pub fn attach(&self, subscription: &Arc<Subscription>) -> usize {
        let mut state = self.inner.state.lock();

        subscription.set_state(SubscriptionState::Snapshotting);
        let sent = subscription.deliver_snapshot(&state.documents);

        let previous = state.subscribers.insert(
            subscription.session().to_string(),
            Arc::clone(subscription),
        );
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, subscription) {
                previous.terminate();
            }
        }
        subscription.set_state(SubscriptionState::Live);

        tracing::debug!(
            publication = %self.inner.name,
            session = subscription.session(),
            snapshot = sent,
            "Subscription live"
        );
        sent
    }

    /// Remove `subscription` from the subscriber set.
    ///
    /// Returns `false` if a different subscription of the session is
    /// registered, or none is.
    pub fn detach(&self, subscription: &Arc<Subscription>) -> bool {
        let mut state = self.inner.state.lock();
        let current = state.subscribers.get(subscription.session());
        if !current.is_some_and(|current| Arc::ptr_eq(current, subscription)) {
            return false;
        }
        state.subscribers.remove(subscription.session());
        true
    }
}

impl std::fmt::Debug for PublicationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicationHandle")
            .field("name", &self.inner.name)
            .field("bundle", &self.inner.bundle)
            .finish_non_exhaustive()
    }
}

/// Errors for document mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No document with this id
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    /// Document body was not a JSON object
    #[error("document {0} is not a JSON object")]
    NotAnObject(String),
}
