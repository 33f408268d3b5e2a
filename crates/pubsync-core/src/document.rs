//! Document model and field-level diffs.
//!
//! A document is an opaque string id plus a map of field name to JSON value.
//! Changes are expressed as a [`Diff`]:
//! - `changed` holds fields that are new or whose value differs
//! - `cleared` lists fields that existed before and are now gone

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field name to value mapping of a single document.
pub type Fields = serde_json::Map<String, Value>;

/// All documents of one publication, keyed by document id.
pub type Documents = BTreeMap<String, Fields>;

/// Field-level difference between two versions of a document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Diff {
    /// Document identifier
    pub id: String,
    /// Fields that were introduced or changed value
    pub changed: Fields,
    /// Fields that were present before and are now absent, in their previous order
    pub cleared: Vec<String>,
}

impl Diff {
    /// Create a diff with a single changed field.
    #[must_use]
    pub fn set(id: impl Into<String>, field: impl Into<String>, value: Value) -> Self {
        let mut changed = Fields::new();
        changed.insert(field.into(), value);
        Self {
            id: id.into(),
            changed,
            cleared: Vec::new(),
        }
    }

    /// Create a diff with a single cleared field.
    #[must_use]
    pub fn unset(id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            changed: Fields::new(),
            cleared: vec![field.into()],
        }
    }

    /// Check whether the diff carries no field differences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.cleared.is_empty()
    }
}

/// Compute the diff that turns `old` into `new`.
///
/// Values are compared with `serde_json::Value` equality, so nested objects
/// and arrays count as unchanged when they are structurally equal.
#[must_use]
pub fn compute_diff(id: &str, old: &Fields, new: &Fields) -> Diff {
    let cleared = old
        .keys()
        .filter(|field| !new.contains_key(*field))
        .cloned()
        .collect();

    let changed = new
        .iter()
        .filter(|(field, value)| old.get(*field) != Some(*value))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();

    Diff {
        id: id.to_string(),
        changed,
        cleared,
    }
}
