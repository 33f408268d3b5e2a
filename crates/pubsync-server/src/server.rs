//! Server state: registries and live sessions.

use crate::config::ServerConfig;
use crate::methods::{Handler, MethodRegistry};
use crate::session::{Outbox, Session, SessionId};
use parking_lot::RwLock;
use pubsync_core::{PredicateBundle, PublicationHandle, PublicationRegistry, RegistryError};
use std::collections::HashMap;
use std::sync::Arc;

/// The server.
///
/// Owns the method registry, the publication registry and the table of
/// connected sessions. Methods and publications are registered on
/// construction; connections are then driven through a
/// [`ProtocolEngine`](crate::ProtocolEngine).
///
/// # Example
///
/// ```
/// use pubsync_server::{sync_handler, Server, ServerConfig};
/// use pubsync_core::PredicateBundle;
///
/// let server = Server::new(ServerConfig::default());
/// server
///     .register_method("echo", sync_handler(|args| Ok(args.into_iter().next().unwrap_or_default())))
///     .unwrap();
/// let items = server.publish("items", PredicateBundle::new()).unwrap();
/// items.upsert_json("a", serde_json::json!({"x": 1})).unwrap();
/// ```
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    methods: MethodRegistry,
    publications: PublicationRegistry,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl Server {
    /// Create a server with empty registries.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            methods: MethodRegistry::new(),
            publications: PublicationRegistry::new(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Method registry.
    #[must_use]
    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    /// Register one method.
    ///
    /// # Errors
    ///
    /// Returns error if the name is already registered.
    pub fn register_method(
        &self,
        name: impl Into<String>,
        handler: Handler,
    ) -> Result<(), RegistryError> {
        self.methods.register(name, handler)
    }

    /// Register several methods.
    ///
    /// # Errors
    ///
    /// Returns error for the first name already registered.
    pub fn register_methods<I, S>(&self, methods: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = (S, Handler)>,
        S: Into<String>,
    {
        self.methods.register_all(methods)
    }

    /// Register a publication and return the handle that mutates it.
    ///
    /// # Errors
    ///
    /// Returns error if the name is already registered.
    pub fn publish(
        &self,
        name: impl Into<String>,
        bundle: PredicateBundle,
    ) -> Result<PublicationHandle, RegistryError> {
        self.publications.register(name, bundle)
    }

    /// Look up a publication.
    #[must_use]
    pub fn publication(&self, name: &str) -> Option<PublicationHandle> {
        self.publications.get(name)
    }

    /// Names of registered publications.
    #[must_use]
    pub fn publication_names(&self) -> Vec<String> {
        self.publications.names()
    }

    /// Create and track a session for a new connection.
    pub(crate) fn open_session(&self, outbox: Outbox) -> Arc<Session> {
        let session = Arc::new(Session::new(outbox));
        self.sessions
            .write()
            .insert(session.id().clone(), Arc::clone(&session));
        session
    }

    /// Drop a session and all its subscriptions.
    ///
    /// Returns `false` if the session was already gone.
    pub(crate) fn close_session(&self, id: &SessionId) -> bool {
        let session = self.sessions.write().remove(id);
        match session {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Look up a live session.
    #[must_use]
    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Close every session. Registries stay intact.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.close();
        }
        tracing::info!(sessions = sessions.len(), "Server sessions closed");
    }
}
