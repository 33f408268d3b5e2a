//! Protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Classification tag carried by every method error.
pub const ERROR_TYPE: &str = "Meteor.Error";

/// A message sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Open the session
    Connect {
        /// Protocol version proposed by the client
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        /// Versions the client supports
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        support: Vec<String>,
    },
    /// Remote procedure call
    Method {
        /// Request identifier, echoed verbatim in `result` and `updated`
        id: Value,
        /// Method name
        method: String,
        /// Positional arguments
        #[serde(default)]
        params: Vec<Value>,
    },
    /// Subscribe to a publication
    Sub {
        /// Request identifier, echoed verbatim in `ready`
        id: Value,
        /// Publication name
        name: String,
        /// Subscriber params, passed verbatim to the publication's predicates
        #[serde(default)]
        params: Value,
    },
    /// Keep-alive
    Ping {
        /// Optional identifier echoed in `pong`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    /// Any other `msg` kind
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Create a `connect` message.
    #[must_use]
    pub fn connect() -> Self {
        Self::Connect {
            version: None,
            support: Vec::new(),
        }
    }

    /// Create a `method` message.
    #[must_use]
    pub fn method(id: impl Into<Value>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Method {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Create a `sub` message.
    #[must_use]
    pub fn sub(id: impl Into<Value>, name: impl Into<String>, params: Value) -> Self {
        Self::Sub {
            id: id.into(),
            name: name.into(),
            params,
        }
    }

    /// Create a `ping` message.
    #[must_use]
    pub fn ping(id: Option<Value>) -> Self {
        Self::Ping { id }
    }

    /// The `msg` tag of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Method { .. } => "method",
            Self::Sub { .. } => "sub",
            Self::Ping { .. } => "ping",
            Self::Unknown => "unknown",
        }
    }
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Session established
    Connected {
        /// Session identifier
        session: String,
    },
    /// Outcome of a method call
    Result {
        /// Request identifier
        id: Value,
        /// Return value on success
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error on failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    /// Writes of a successful method call are complete
    Updated {
        /// Request identifier
        id: Value,
    },
    /// Document became visible
    Added {
        /// Publication name
        collection: String,
        /// Document identifier
        id: String,
        /// Full document
        fields: Map<String, Value>,
    },
    /// Document changed
    Changed {
        /// Publication name
        collection: String,
        /// Document identifier
        id: String,
        /// New or changed fields
        fields: Map<String, Value>,
        /// Removed fields
        cleared: Vec<String>,
    },
    /// Document removed
    Removed {
        /// Publication name
        collection: String,
        /// Document identifier
        id: String,
    },
    /// Initial snapshot of the listed subscriptions is complete
    Ready {
        /// `sub` request identifiers
        subs: Vec<Value>,
    },
    /// Keep-alive reply
    Pong {
        /// Identifier from the `ping`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    /// Rejected inbound message (strict mode only)
    Error {
        /// Why the message was rejected
        reason: String,
        /// The offending message, when it parsed as JSON
        #[serde(
            rename = "offendingMessage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        offending_message: Option<Value>,
    },
}

impl ServerMessage {
    /// Successful method result.
    #[must_use]
    pub fn result(id: impl Into<Value>, value: Value) -> Self {
        Self::Result {
            id: id.into(),
            result: Some(value),
            error: None,
        }
    }

    /// Failed method result.
    #[must_use]
    pub fn failure(id: impl Into<Value>, error: WireError) -> Self {
        Self::Result {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// The `msg` tag of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Result { .. } => "result",
            Self::Updated { .. } => "updated",
            Self::Added { .. } => "added",
            Self::Changed { .. } => "changed",
            Self::Removed { .. } => "removed",
            Self::Ready { .. } => "ready",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
        }
    }
}

/// Structured error carried in a failed `result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Numeric code (404 unknown method, 500 handler failure)
    pub error: u16,
    /// Human-readable reason
    pub reason: String,
    /// Classification tag
    #[serde(rename = "errorType")]
    pub error_type: String,
}

impl WireError {
    /// Create an error with the standard classification tag.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            error: code,
            reason: reason.into(),
            error_type: ERROR_TYPE.to_string(),
        }
    }
}
