//! Predicate bundles controlling what each subscriber sees.
//!
//! A publication registers up to four functions. Each receives the
//! subscriber-supplied params as its first argument:
//! - snapshot selector: which stored documents to send on subscribe
//! - added: whether a newly inserted document is delivered
//! - changed: whether a diff is delivered
//! - removed: whether a removal is delivered
//!
//! Missing functions default to "everything" / `true`. A bundle is bound to
//! concrete params once, at subscribe time, producing a [`BoundFilter`].

use crate::document::{Documents, Fields};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type SnapshotFn = dyn Fn(&Value, &Documents) -> Vec<(String, Fields)> + Send + Sync;
type AddedFn = dyn Fn(&Value, &str, &Fields) -> bool + Send + Sync;
type ChangedFn = dyn Fn(&Value, &str, &Fields, &str) -> bool + Send + Sync;
type RemovedFn = dyn Fn(&Value, &str) -> bool + Send + Sync;

/// The four optional selection and visibility functions of a publication.
#[derive(Clone, Default)]
pub struct PredicateBundle {
    snapshot: Option<Arc<SnapshotFn>>,
    added: Option<Arc<AddedFn>>,
    changed: Option<Arc<ChangedFn>>,
    removed: Option<Arc<RemovedFn>>,
}

impl PredicateBundle {
    /// Create a bundle with every function defaulted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the snapshot selector.
    #[must_use]
    pub fn snapshot<F>(mut self, selector: F) -> Self
    where
        F: Fn(&Value, &Documents) -> Vec<(String, Fields)> + Send + Sync + 'static,
    {
        self.snapshot = Some(Arc::new(selector));
        self
    }

    /// Override add visibility.
    #[must_use]
    pub fn added<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value, &str, &Fields) -> bool + Send + Sync + 'static,
    {
        self.added = Some(Arc::new(predicate));
        self
    }

    /// Override change visibility. The last argument is the publication name.
    #[must_use]
    pub fn changed<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value, &str, &Fields, &str) -> bool + Send + Sync + 'static,
    {
        self.changed = Some(Arc::new(predicate));
        self
    }

    /// Override remove visibility.
    #[must_use]
    pub fn removed<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value, &str) -> bool + Send + Sync + 'static,
    {
        self.removed = Some(Arc::new(predicate));
        self
    }

    /// Resolve the bundle against one subscription's params.
    #[must_use]
    pub fn bind(&self, params: &Value) -> BoundFilter {
        BoundFilter {
            params: params.clone(),
            snapshot: self.snapshot.clone(),
            added: self.added.clone(),
            changed: self.changed.clone(),
            removed: self.removed.clone(),
        }
    }
}

impl fmt::Debug for PredicateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateBundle")
            .field("snapshot", &self.snapshot.is_some())
            .field("added", &self.added.is_some())
            .field("changed", &self.changed.is_some())
            .field("removed", &self.removed.is_some())
            .finish()
    }
}

/// A predicate bundle bound to the params of a single subscription.
pub struct BoundFilter {
    params: Value,
    snapshot: Option<Arc<SnapshotFn>>,
    added: Option<Arc<AddedFn>>,
    changed: Option<Arc<ChangedFn>>,
    removed: Option<Arc<RemovedFn>>,
}

impl BoundFilter {
    /// A filter that selects everything and hides nothing.
    #[must_use]
    pub fn pass_all(params: &Value) -> Self {
        PredicateBundle::new().bind(params)
    }

    /// The params this filter was bound with.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Pick the documents sent as the initial snapshot.
    #[must_use]
    pub fn select_snapshot(&self, documents: &Documents) -> Vec<(String, Fields)> {
        match &self.snapshot {
            Some(selector) => selector(&self.params, documents),
            None => documents
                .iter()
                .map(|(id, fields)| (id.clone(), fields.clone()))
                .collect(),
        }
    }

    /// Whether an inserted document is visible.
    #[must_use]
    pub fn is_added_visible(&self, id: &str, fields: &Fields) -> bool {
        self.added
            .as_ref()
            .map_or(true, |predicate| predicate(&self.params, id, fields))
    }

    /// Whether a change is visible.
    #[must_use]
    pub fn is_changed_visible(&self, id: &str, changed: &Fields, publication: &str) -> bool {
        self.changed
            .as_ref()
            .map_or(true, |predicate| predicate(&self.params, id, changed, publication))
    }

    /// Whether a removal is visible.
    #[must_use]
    pub fn is_removed_visible(&self, id: &str) -> bool {
        self.removed
            .as_ref()
            .map_or(true, |predicate| predicate(&self.params, id))
    }
}

impl fmt::Debug for BoundFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFilter")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_documents() -> Documents {
        let mut docs = Documents::new();
        for (id, owner) in [("a", "alice"), ("b", "bob"), ("c", "alice")] {
            let mut fields = Fields::new();
            fields.insert("owner".to_string(), json!(owner));
            docs.insert(id.to_string(), fields);
        }
        docs
    }

    #[test]
    fn defaults_pass_everything() {
        let filter = BoundFilter::pass_all(&Value::Null);
        let docs = sample_documents();

        assert_eq!(filter.select_snapshot(&docs).len(), 3);
        assert!(filter.is_added_visible("a", &Fields::new()));
        assert!(filter.is_changed_visible("a", &Fields::new(), "items"));
        assert!(filter.is_removed_visible("a"));
    }

    #[test]
    fn predicates_receive_bound_params() {
        let bundle = PredicateBundle::new()
            .snapshot(|params, docs| {
                docs.iter()
                    .filter(|(_, fields)| fields.get("owner") == Some(params))
                    .map(|(id, fields)| (id.clone(), fields.clone()))
                    .collect()
            })
            .added(|params, _, fields| fields.get("owner") == Some(params))
            .removed(|params, id| params == &json!("alice") && id != "b");

        let alice = bundle.bind(&json!("alice"));
        let bob = bundle.bind(&json!("bob"));
        let docs = sample_documents();

        let ids: Vec<String> = alice
            .select_snapshot(&docs)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(bob.select_snapshot(&docs).len(), 1);

        let doc = docs.get("b").unwrap();
        assert!(!alice.is_added_visible("b", doc));
        assert!(bob.is_added_visible("b", doc));

        assert!(alice.is_removed_visible("a"));
        assert!(!bob.is_removed_visible("a"));
    }

    #[test]
    fn changed_predicate_sees_publication_name() {
        let bundle = PredicateBundle::new().changed(|_, _, _, publication| publication == "items");
        let filter = bundle.bind(&Value::Null);

        assert!(filter.is_changed_visible("a", &Fields::new(), "items"));
        assert!(!filter.is_changed_visible("a", &Fields::new(), "other"));
    }

    #[test]
    fn debug_lists_configured_functions() {
        let bundle = PredicateBundle::new().added(|_, _, _| false);
        let rendered = format!("{bundle:?}");
        assert!(rendered.contains("added: true"));
        assert!(rendered.contains("snapshot: false"));
    }
}
