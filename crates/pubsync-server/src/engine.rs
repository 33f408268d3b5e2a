//! Protocol engine: interprets inbound messages for each connection.
//!
//! There is a single state per connection. `connect`, `method`, `sub` and
//! `ping` are accepted at any time, in any order; a `connect` is not
//! required first. Messages of one connection are handled in arrival
//! order, but each method call runs as its own task, so replies of
//! concurrent calls may interleave.

use crate::methods::MethodError;
use crate::server::Server;
use crate::session::Session;
use pubsync_proto::{ClientMessage, Codec, ServerMessage};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receiving end of a connection's outbound messages.
pub type Outbound = mpsc::UnboundedReceiver<ServerMessage>;

/// Drives sessions of a [`Server`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProtocolEngine {
    server: Arc<Server>,
}

impl ProtocolEngine {
    /// Create an engine for `server`.
    #[must_use]
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    /// The server this engine drives.
    #[must_use]
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Codec used on connections.
    #[must_use]
    pub fn codec(&self) -> Codec {
        self.server.config().codec
    }

    /// A connection was opened: create its session.
    ///
    /// Everything to be written to the connection arrives on the returned
    /// receiver.
    #[must_use]
    pub fn open(&self) -> (Arc<Session>, Outbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.server.open_session(tx);
        tracing::info!(session = %session.id(), "Connection opened");
        (session, rx)
    }

    /// The connection closed: drop its session and subscriptions. Nothing
    /// is sent to the client.
    pub fn close(&self, session: &Session) {
        if self.server.close_session(session.id()) {
            tracing::info!(session = %session.id(), "Connection closed");
        }
    }

    /// Decode a frame body and handle it.
    ///
    /// Bodies that fail to decode are dropped, or answered with an `error`
    /// message in strict mode.
    pub fn handle_frame(&self, session: &Arc<Session>, body: &[u8]) {
        let codec = self.codec();
        match codec.decode::<ClientMessage>(body) {
            Ok(message) => self.handle(session, message),
            Err(err) => {
                tracing::debug!(session = %session.id(), error = %err, "Malformed message");
                self.reject(session, err.to_string(), codec.decode_value(body));
            }
        }
    }

    /// Handle one decoded message.
    ///
    /// Must run inside a Tokio runtime: method calls are spawned as tasks.
    pub fn handle(&self, session: &Arc<Session>, message: ClientMessage) {
        tracing::trace!(session = %session.id(), kind = message.kind(), "Inbound message");

        match message {
            ClientMessage::Connect { .. } => {
                reply(
                    session,
                    ServerMessage::Connected {
                        session: session.id().to_string(),
                    },
                );
            }
            ClientMessage::Method { id, method, params } => {
                self.call(session, id, method, params);
            }
            ClientMessage::Sub { id, name, params } => {
                self.subscribe(session, id, &name, &params);
            }
            ClientMessage::Ping { id } => {
                reply(session, ServerMessage::Pong { id });
            }
            ClientMessage::Unknown => {
                tracing::debug!(session = %session.id(), "Ignoring unknown message kind");
                self.reject(session, "unknown message kind".to_string(), None);
            }
        }
    }

    fn call(&self, session: &Arc<Session>, id: Value, method: String, params: Vec<Value>) {
        // The handler runs inside its own task so a panic surfaces as a JoinError.
        let server = Arc::clone(&self.server);
        let name = method.clone();
        let invocation =
            tokio::spawn(async move { server.methods().invoke(&name, params).await });
        let session = Arc::clone(session);

        tokio::spawn(async move {
            let outcome = match invocation.await {
                Ok(outcome) => outcome,
                Err(err) => Err(MethodError::failed(format!("method task failed: {err}"))),
            };

            match outcome {
                Ok(result) => {
                    reply(&session, ServerMessage::result(id.clone(), result));
                    reply(&session, ServerMessage::Updated { id });
                }
                Err(err) => {
                    tracing::warn!(
                        session = %session.id(),
                        method = %method,
                        code = err.code(),
                        error = %err,
                        "Method call failed"
                    );
                    reply(&session, ServerMessage::failure(id, err.to_wire()));
                }
            }
        });
    }

    fn subscribe(&self, session: &Arc<Session>, id: Value, name: &str, params: &Value) {
        let publication = self.server.publication(name);
        let subscription = session.subscribe(id.clone(), name, params, publication);

        tracing::debug!(
            session = %session.id(),
            publication = name,
            state = ?subscription.state(),
            "Subscription ready"
        );
        reply(
            session,
            ServerMessage::Ready { subs: vec![id] },
        );
    }

    fn reject(&self, session: &Session, reason: String, offending_message: Option<Value>) {
        if self.server.config().strict {
            reply(
                session,
                ServerMessage::Error {
                    reason,
                    offending_message,
                },
            );
        }
    }
}

fn reply(session: &Session, message: ServerMessage) {
    if let Err(err) = session.send(message) {
        tracing::debug!(session = %session.id(), error = %err, "Reply dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::methods::{handler, sync_handler};
    use pubsync_core::{Fields, PredicateBundle};
    use pubsync_proto::WireError;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn engine_with(config: ServerConfig) -> ProtocolEngine {
        let server = Server::new(config);
        server
            .register_method(
                "echo",
                sync_handler(|args| Ok(args.into_iter().next().unwrap_or(Value::Null))),
            )
            .unwrap();
        server
            .register_method("fail", sync_handler(|_| Err(MethodError::failed("nope"))))
            .unwrap();
        ProtocolEngine::new(Arc::new(server))
    }

    fn engine() -> ProtocolEngine {
        engine_with(ServerConfig::default())
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    async fn next(rx: &mut Outbound) -> ServerMessage {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout waiting for message")
            .expect("outbox closed")
    }

    fn drain(rx: &mut Outbound) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn connect_replies_with_session_id() {
        let engine = engine();
        let (session, mut rx) = engine.open();

        engine.handle(&session, ClientMessage::connect());

        assert_eq!(
            next(&mut rx).await,
            ServerMessage::Connected {
                session: session.id().to_string()
            }
        );
    }

    #[tokio::test]
    async fn ping_echoes_id() {
        let engine = engine();
        let (session, mut rx) = engine.open();

        engine.handle(&session, ClientMessage::ping(Some(json!("p1"))));
        engine.handle(&session, ClientMessage::ping(None));

        assert_eq!(next(&mut rx).await, ServerMessage::Pong { id: Some(json!("p1")) });
        assert_eq!(next(&mut rx).await, ServerMessage::Pong { id: None });
    }

    #[tokio::test]
    async fn method_result_then_updated() {
        let engine = engine();
        let (session, mut rx) = engine.open();

        engine.handle(&session, ClientMessage::method("1", "echo", vec![json!("hi")]));

        assert_eq!(next(&mut rx).await, ServerMessage::result("1", json!("hi")));
        assert_eq!(next(&mut rx).await, ServerMessage::Updated { id: json!("1") });
    }

    #[tokio::test]
    async fn non_string_ids_are_echoed_verbatim() {
        let engine = engine();
        engine.server().publish("items", PredicateBundle::new()).unwrap();
        let (session, mut rx) = engine.open();

        engine.handle_frame(&session, br#"{"msg":"ping","id":7}"#);
        assert_eq!(next(&mut rx).await, ServerMessage::Pong { id: Some(json!(7)) });

        engine.handle_frame(&session, br#"{"msg":"method","id":8,"method":"nope"}"#);
        assert_eq!(
            next(&mut rx).await,
            ServerMessage::failure(8, WireError::new(404, "Method not found"))
        );

        engine.handle_frame(&session, br#"{"msg":"method","id":[9],"method":"echo","params":[1]}"#);
        assert_eq!(next(&mut rx).await, ServerMessage::result(json!([9]), json!(1)));
        assert_eq!(next(&mut rx).await, ServerMessage::Updated { id: json!([9]) });

        engine.handle_frame(&session, br#"{"msg":"sub","id":10,"name":"items"}"#);
        assert_eq!(
            next(&mut rx).await,
            ServerMessage::Ready {
                subs: vec![json!(10)]
            }
        );
    }

    #[tokio::test]
    async fn unknown_method_is_404_without_updated() {
        let engine = engine();
        let (session, mut rx) = engine.open();

        engine.handle(&session, ClientMessage::method("1", "missing", vec![]));

        assert_eq!(
            next(&mut rx).await,
            ServerMessage::failure("1", WireError::new(404, "Method not found"))
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn failing_method_is_500() {
        let engine = engine();
        let (session, mut rx) = engine.open();

        engine.handle(&session, ClientMessage::method("1", "fail", vec![]));

        assert_eq!(
            next(&mut rx).await,
            ServerMessage::failure("1", WireError::new(500, "nope"))
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn panicking_method_is_500() {
        let engine = engine();
        engine
            .server()
            .register_method("panic", sync_handler(|_| panic!("handler bug")))
            .unwrap();
        let (session, mut rx) = engine.open();

        engine.handle(&session, ClientMessage::method("1", "panic", vec![]));

        let ServerMessage::Result { error: Some(error), .. } = next(&mut rx).await else {
            panic!("expected error result");
        };
        assert_eq!(error.error, 500);
    }

    #[tokio::test]
    async fn slow_method_does_not_block_session() {
        let engine = engine();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let gate = Arc::new(parking_lot::Mutex::new(Some(gate)));
        engine
            .server()
            .register_method(
                "slow",
                handler(move |_| {
                    let gate = gate.lock().take();
                    async move {
                        if let Some(gate) = gate {
                            let _ = gate.await;
                        }
                        Ok::<_, MethodError>(json!("done"))
                    }
                }),
            )
            .unwrap();
        let (session, mut rx) = engine.open();

        engine.handle(&session, ClientMessage::method("1", "slow", vec![]));
        engine.handle(&session, ClientMessage::ping(Some(json!("p"))));

        assert_eq!(next(&mut rx).await, ServerMessage::Pong { id: Some(json!("p")) });
        release.send(()).unwrap();
        assert_eq!(next(&mut rx).await, ServerMessage::result("1", json!("done")));
        assert_eq!(next(&mut rx).await, ServerMessage::Updated { id: json!("1") });
    }

    #[tokio::test]
    async fn subscribe_delivers_snapshot_then_ready() {
        let engine = engine();
        let items = engine
            .server()
            .publish("items", PredicateBundle::new().added(|_, _, _| false))
            .unwrap();
        for id in ["a", "b", "c"] {
            items.upsert(id, fields(json!({"n": id})));
        }
        let (session, mut rx) = engine.open();

        engine.handle(&session, ClientMessage::sub("s1", "items", Value::Null));

        let messages = drain(&mut rx);
        let kinds: Vec<&str> = messages.iter().map(ServerMessage::kind).collect();
        assert_eq!(kinds, vec!["added", "added", "added", "ready"]);
        assert_eq!(
            messages[3],
            ServerMessage::Ready {
                subs: vec![json!("s1")]
            }
        );
    }

    #[tokio::test]
    async fn live_add_and_change_reach_subscriber() {
        let engine = engine();
        let items = engine.server().publish("items", PredicateBundle::new()).unwrap();
        let (session, mut rx) = engine.open();
        engine.handle(&session, ClientMessage::sub("s1", "items", Value::Null));
        drain(&mut rx);

        items.upsert("a", fields(json!({"x": 1})));
        items.upsert("a", fields(json!({"y": 2})));

        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::Added {
                    collection: "items".to_string(),
                    id: "a".to_string(),
                    fields: fields(json!({"x": 1})),
                },
                ServerMessage::Changed {
                    collection: "items".to_string(),
                    id: "a".to_string(),
                    fields: fields(json!({"y": 2})),
                    cleared: vec!["x".to_string()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn sessions_get_independently_filtered_streams() {
        let engine = engine();
        let items = engine
            .server()
            .publish(
                "items",
                PredicateBundle::new()
                    .added(|params, _, doc| doc.get("owner") == Some(params))
                    .changed(|params, id, _, _| params == &json!("alice") && id == "a"),
            )
            .unwrap();
        let (alice, mut alice_rx) = engine.open();
        let (bob, mut bob_rx) = engine.open();
        engine.handle(&alice, ClientMessage::sub("1", "items", json!("alice")));
        engine.handle(&bob, ClientMessage::sub("1", "items", json!("bob")));
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        items.upsert("a", fields(json!({"owner": "alice"})));
        items.upsert("b", fields(json!({"owner": "bob"})));
        items.upsert("a", fields(json!({"owner": "alice", "v": 2})));

        let alice_kinds: Vec<&str> = drain(&mut alice_rx).iter().map(ServerMessage::kind).collect();
        let bob_msgs = drain(&mut bob_rx);
        assert_eq!(alice_kinds, vec!["added", "changed"]);
        assert_eq!(bob_msgs.len(), 1);
        assert!(matches!(&bob_msgs[0], ServerMessage::Added { id, .. } if id == "b"));
    }

    #[tokio::test]
    async fn method_handlers_can_mutate_publications() {
        let engine = engine();
        let items = engine.server().publish("items", PredicateBundle::new()).unwrap();
        let writer = items.clone();
        engine
            .server()
            .register_method(
                "insert",
                sync_handler(move |args| {
                    let mut args = args.into_iter();
                    let id = args.next().and_then(|v| v.as_str().map(str::to_string));
                    let doc = args.next().unwrap_or(Value::Null);
                    let id = id.ok_or_else(|| MethodError::failed("missing id"))?;
                    writer.upsert_json(id, doc).map_err(MethodError::failed)?;
                    Ok(Value::Null)
                }),
            )
            .unwrap();
        let (session, mut rx) = engine.open();
        engine.handle(&session, ClientMessage::sub("s", "items", Value::Null));
        assert_eq!(next(&mut rx).await.kind(), "ready");

        engine.handle(
            &session,
            ClientMessage::method("m", "insert", vec![json!("a"), json!({"x": 1})]),
        );

        assert_eq!(next(&mut rx).await.kind(), "added");
        assert_eq!(next(&mut rx).await, ServerMessage::result("m", Value::Null));
        assert_eq!(next(&mut rx).await.kind(), "updated");
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn unknown_publication_is_ready_but_silent() {
        let engine = engine();
        let (session, mut rx) = engine.open();

        engine.handle(&session, ClientMessage::sub("1", "nothing", Value::Null));

        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::Ready {
                subs: vec![json!("1")]
            }]
        );
    }

    #[tokio::test]
    async fn close_discards_session_and_subscriptions() {
        let engine = engine();
        let items = engine.server().publish("items", PredicateBundle::new()).unwrap();
        let (session, mut rx) = engine.open();
        engine.handle(&session, ClientMessage::sub("1", "items", Value::Null));
        drain(&mut rx);

        engine.close(&session);
        items.upsert("a", Fields::new());

        assert_eq!(engine.server().session_count(), 0);
        assert_eq!(items.subscriber_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_and_malformed_messages_are_dropped() {
        let engine = engine();
        let (session, mut rx) = engine.open();

        engine.handle_frame(&session, br#"{"msg":"unsub","id":"1"}"#);
        engine.handle_frame(&session, b"not json");
        engine.handle_frame(&session, br#"{"msg":"method","id":"1"}"#);
        engine.handle_frame(&session, br#"{"msg":"ping","id":"after"}"#);

        assert_eq!(next(&mut rx).await, ServerMessage::Pong { id: Some(json!("after")) });
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn strict_mode_rejects_unknown_and_malformed() {
        let engine = engine_with(ServerConfig {
            strict: true,
            ..ServerConfig::default()
        });
        let (session, mut rx) = engine.open();

        engine.handle_frame(&session, br#"{"msg":"unsub","id":"1"}"#);
        engine.handle_frame(&session, br#"{"msg":"method","id":"1"}"#);

        let ServerMessage::Error { reason, .. } = next(&mut rx).await else {
            panic!("expected error message");
        };
        assert_eq!(reason, "unknown message kind");
        let ServerMessage::Error {
            offending_message, ..
        } = next(&mut rx).await
        else {
            panic!("expected error message");
        };
        assert_eq!(offending_message, Some(json!({"msg": "method", "id": "1"})));
    }
}
