//! Per-connection sessions.

use chrono::Utc;
use parking_lot::Mutex;
use pubsync_core::{
    DeliveryError, Diff, EventSink, Fields, PublicationHandle, Subscription,
};
use pubsync_proto::ServerMessage;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound message channel of one connection.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// Connection-scoped session identifier: `<connect unix millis>-<counter>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate a fresh identifier, unique within this process.
    #[must_use]
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let counter = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        Self(format!("{millis}-{counter}"))
    }

    /// The identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct SubscriptionEntry {
    subscription: Arc<Subscription>,
    publication: Option<PublicationHandle>,
}

/// Server-side state of one connection.
pub struct Session {
    id: SessionId,
    outbox: Outbox,
    subscriptions: Mutex<HashMap<String, SubscriptionEntry>>,
}

impl Session {
    /// Create a session sending through `outbox`.
    #[must_use]
    pub fn new(outbox: Outbox) -> Self {
        Self {
            id: SessionId::generate(),
            outbox,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Queue a message for this connection.
    ///
    /// # Errors
    ///
    /// Returns error if the connection is gone.
    pub fn send(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        self.outbox.send(message).map_err(|_| DeliveryError::Closed)
    }

    /// Subscribe to `name`, replacing any earlier subscription of this
    /// session to the same name.
    ///
    /// With a publication the snapshot is delivered and the subscription
    /// goes live before this returns. Without one the subscription is kept
    /// but never receives data.
    pub fn subscribe(
        &self,
        request_id: impl Into<Value>,
        name: &str,
        params: &Value,
        publication: Option<PublicationHandle>,
    ) -> Arc<Subscription> {
        let sink = Arc::new(OutboxSink {
            outbox: self.outbox.clone(),
        });
        let subscription = Arc::new(Subscription::new(
            self.id.as_str(),
            request_id,
            name,
            params,
            publication.as_ref().map(PublicationHandle::bundle),
            sink,
        ));

        match &publication {
            Some(publication) => {
                publication.attach(&subscription);
            }
            None => {
                tracing::debug!(session = %self.id, publication = name, "Subscribed to unknown publication");
            }
        }

        let previous = self.subscriptions.lock().insert(
            name.to_string(),
            SubscriptionEntry {
                subscription: Arc::clone(&subscription),
                publication,
            },
        );
        if let Some(previous) = previous {
            previous.subscription.terminate();
        }

        subscription
    }

    /// The current subscription to `name`, if any.
    #[must_use]
    pub fn subscription(&self, name: &str) -> Option<Arc<Subscription>> {
        self.subscriptions
            .lock()
            .get(name)
            .map(|entry| Arc::clone(&entry.subscription))
    }

    /// Number of subscriptions held.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Terminate every subscription and detach it from its publication.
    pub fn close(&self) {
        let entries: Vec<SubscriptionEntry> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();

        for entry in &entries {
            if let Some(publication) = &entry.publication {
                publication.detach(&entry.subscription);
            }
            entry.subscription.terminate();
        }

        tracing::debug!(session = %self.id, subscriptions = entries.len(), "Session closed");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

/// Turns subscription events into protocol messages on a connection.
struct OutboxSink {
    outbox: Outbox,
}

impl OutboxSink {
    fn push(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        self.outbox.send(message).map_err(|_| DeliveryError::Closed)
    }
}

impl EventSink for OutboxSink {
    fn added(&self, collection: &str, id: &str, fields: &Fields) -> Result<(), DeliveryError> {
        self.push(ServerMessage::Added {
            collection: collection.to_string(),
            id: id.to_string(),
            fields: fields.clone(),
        })
    }

    fn changed(&self, collection: &str, diff: &Diff) -> Result<(), DeliveryError> {
        self.push(ServerMessage::Changed {
            collection: collection.to_string(),
            id: diff.id.clone(),
            fields: diff.changed.clone(),
            cleared: diff.cleared.clone(),
        })
    }

    fn removed(&self, collection: &str, id: &str) -> Result<(), DeliveryError> {
        self.push(ServerMessage::Removed {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubsync_core::{PredicateBundle, PublicationRegistry, SubscriptionState};
    use serde_json::json;

    fn session() -> (Session, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();

        assert_ne!(a, b);
        let (millis, counter) = a.as_str().split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert!(counter.parse::<u64>().is_ok());
    }

    #[test]
    fn subscription_events_become_messages() {
        let registry = PublicationRegistry::new();
        let items = registry.register("items", PredicateBundle::new()).unwrap();
        items.upsert("a", json!({"x": 1}).as_object().cloned().unwrap());

        let (session, mut rx) = session();
        session.subscribe("1", "items", &Value::Null, Some(items.clone()));
        items.upsert("a", json!({"y": 2}).as_object().cloned().unwrap());
        items.remove("a");

        let kinds: Vec<&str> = drain(&mut rx).iter().map(ServerMessage::kind).collect();
        assert_eq!(kinds, vec!["added", "changed", "removed"]);
    }

    #[test]
    fn unknown_publication_subscription_is_kept_idle() {
        let (session, mut rx) = session();
        let sub = session.subscribe("1", "nothing", &json!([1]), None);

        assert_eq!(sub.state(), SubscriptionState::Created);
        assert_eq!(session.subscription_count(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn close_detaches_everything() {
        let registry = PublicationRegistry::new();
        let items = registry.register("items", PredicateBundle::new()).unwrap();

        let (session, mut rx) = session();
        let sub = session.subscribe("1", "items", &Value::Null, Some(items.clone()));
        assert_eq!(items.subscriber_count(), 1);

        session.close();
        items.upsert("a", serde_json::Map::new());

        assert_eq!(items.subscriber_count(), 0);
        assert_eq!(sub.state(), SubscriptionState::Terminated);
        assert_eq!(session.subscription_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn send_fails_once_connection_is_gone() {
        let (session, rx) = session();
        drop(rx);

        assert_eq!(
            session.send(ServerMessage::Pong { id: None }),
            Err(DeliveryError::Closed)
        );
    }
}
