//! Publication registry.

use crate::filter::PredicateBundle;
use crate::publication::PublicationHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// Maps publication names to their stores. Each name registers once.
#[derive(Debug, Default)]
pub struct PublicationRegistry {
    publications: RwLock<HashMap<String, PublicationHandle>>,
}

impl PublicationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publication and return the handle used to mutate it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the name is taken; the
    /// existing publication is left untouched.
    pub fn register(
        &self,
        name: impl Into<String>,
        bundle: PredicateBundle,
    ) -> Result<PublicationHandle, RegistryError> {
        let name = name.into();
        let mut publications = self.publications.write();
        if publications.contains_key(&name) {
            return Err(RegistryError::Duplicate {
                kind: RegistryKind::Publication,
                name,
            });
        }

        tracing::info!(publication = %name, ?bundle, "Registered publication");
        let handle = PublicationHandle::new(name.clone(), bundle);
        publications.insert(name, handle.clone());
        Ok(handle)
    }

    /// Look up a publication by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<PublicationHandle> {
        self.publications.read().get(name).cloned()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.publications.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered publications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.publications.read().len()
    }

    /// Check whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publications.read().is_empty()
    }
}

/// What kind of name a registry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    /// RPC method
    Method,
    /// Publication
    Publication,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryKind::Method => write!(f, "method"),
            RegistryKind::Publication => write!(f, "publication"),
        }
    }
}

/// Errors raised while registering methods or publications.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The name is already registered
    #[error("a {kind} named {name} already exists")]
    Duplicate {
        /// Registry the name collided in
        kind: RegistryKind,
        /// Colliding name
        name: String,
    },
}
