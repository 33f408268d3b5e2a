//! # pubsync Core
//!
//! Reactive document store and publish/subscribe diff engine.
//!
//! This crate provides:
//! - Document model and field-level diff computation
//! - Predicate bundles deciding snapshot membership and per-event visibility
//! - Subscriptions binding one session to one publication
//! - A publication registry handing out mutation handles
//!
//! Every mutation made through a [`PublicationHandle`] fans out synchronously
//! to the current subscribers of that publication before the call returns.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod filter;
pub mod publication;
pub mod registry;
pub mod subscription;

#[cfg(test)]
mod testing;

pub use document::{compute_diff, Diff, Documents, Fields};
pub use filter::{BoundFilter, PredicateBundle};
pub use publication::{PublicationHandle, StoreError};
pub use registry::{PublicationRegistry, RegistryError, RegistryKind};
pub use subscription::{DeliveryError, EventSink, Subscription, SubscriptionState};
