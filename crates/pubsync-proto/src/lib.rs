//! # pubsync Protocol
//!
//! Message definitions and frame codecs for the pubsync protocol.
//!
//! ## Messages
//!
//! Every message is an object tagged by its `msg` field:
//! - Client → server: `connect`, `method`, `sub`, `ping`
//! - Server → client: `connected`, `result`, `updated`, `added`, `changed`,
//!   `removed`, `ready`, `pong`, `error`
//!
//! ## Framing
//!
//! - JSON: one message per line
//! - CBOR: 4-byte big-endian length prefix, then the body
//!
//! Values that plain JSON cannot express (dates, binary) use the extended
//! encodings in [`ejson`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod ejson;
pub mod messages;

pub use codec::{Codec, CodecError, MAX_FRAME_LEN};
pub use messages::{ClientMessage, ServerMessage, WireError, ERROR_TYPE};
