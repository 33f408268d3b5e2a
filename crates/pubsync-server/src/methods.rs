//! Method registry and RPC handler types.

use parking_lot::RwLock;
use pubsync_core::{RegistryError, RegistryKind};
use pubsync_proto::WireError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Outcome of a method call.
pub type MethodResult = Result<Value, MethodError>;

/// Boxed future returned by a handler.
pub type MethodFuture = Pin<Box<dyn Future<Output = MethodResult> + Send + 'static>>;

/// A registered RPC handler taking the positional arguments of the call.
pub type Handler = Arc<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>;

/// Wrap an async function as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// Wrap a synchronous function as a [`Handler`].
pub fn sync_handler<F>(f: F) -> Handler
where
    F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
{
    Arc::new(move |args| Box::pin(std::future::ready(f(args))))
}

/// Maps method names to handlers. Each name registers once.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, Handler>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single method.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the name is taken; the
    /// existing handler stays registered.
    pub fn register(&self, name: impl Into<String>, handler: Handler) -> Result<(), RegistryError> {
        let name = name.into();
        let mut methods = self.methods.write();
        if methods.contains_key(&name) {
            return Err(RegistryError::Duplicate {
                kind: RegistryKind::Method,
                name,
            });
        }
        tracing::info!(method = %name, "Registered method");
        methods.insert(name, handler);
        Ok(())
    }

    /// Register several methods in order, stopping at the first duplicate.
    /// Methods registered before the duplicate stay registered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] for the first name already taken.
    pub fn register_all<I, S>(&self, methods: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = (S, Handler)>,
        S: Into<String>,
    {
        for (name, handler) in methods {
            self.register(name, handler)?;
        }
        Ok(())
    }

    /// Check whether a method is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    /// Check whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }

    /// Start a call. The returned future resolves to the handler's outcome,
    /// or to [`MethodError::NotFound`] for an unknown name.
    #[must_use]
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> MethodFuture {
        let handler = self.methods.read().get(name).cloned();
        match handler {
            Some(handler) => handler(args),
            None => Box::pin(std::future::ready(Err(MethodError::NotFound(
                name.to_string(),
            )))),
        }
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("MethodRegistry").field("methods", &names).finish()
    }
}

/// Errors surfaced to the caller of a method.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MethodError {
    /// No method with this name
    #[error("Method not found")]
    NotFound(String),
    /// The handler failed
    #[error("{0}")]
    Failed(String),
}

impl MethodError {
    /// Handler failure with the given reason.
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }

    /// Numeric code reported on the wire.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            MethodError::NotFound(_) => 404,
            MethodError::Failed(_) => 500,
        }
    }

    /// Wire representation.
    #[must_use]
    pub fn to_wire(&self) -> WireError {
        WireError::new(self.code(), self.to_string())
    }
}
