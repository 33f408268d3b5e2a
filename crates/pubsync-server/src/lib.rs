//! # pubsync Server
//!
//! Protocol engine, sessions and RPC dispatch for the pubsync
//! publish/subscribe protocol.
//!
//! ## Architecture
//!
//! - [`Server`]: method registry, publication registry and the live session table
//! - [`ProtocolEngine`]: interprets inbound messages per connection
//! - [`Session`]: one per connection, owns its subscriptions and outbound channel
//! - [`transport`]: framed TCP listener feeding the engine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod methods;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{ConfigError, ServerConfig};
pub use engine::{Outbound, ProtocolEngine};
pub use methods::{
    handler, sync_handler, Handler, MethodError, MethodFuture, MethodRegistry, MethodResult,
};
pub use server::Server;
pub use session::{Session, SessionId};
pub use transport::serve;
