//! # pubsync Server
//!
//! Standalone server exposing a demo `items` publication.
//!
//! ## Methods
//!
//! - `echo(value)`: returns its argument
//! - `items.upsert(id, document)`: insert or replace an item
//! - `items.set(id, field, value)` / `items.unset(id, field)`: field updates
//! - `items.remove(id)`: delete an item
//!
//! Subscribing to `items` with params `{"owner": <value>}` limits the
//! stream to items whose `owner` field matches.

use anyhow::{Context, Result};
use pubsync_core::{Fields, PredicateBundle};
use pubsync_server::{serve, sync_handler, MethodError, ProtocolEngine, Server, ServerConfig};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting pubsync server");

    let config = ServerConfig::from_env().context("Invalid configuration")?;
    let bind = config.bind;

    let server = Arc::new(Server::new(config));
    register_demo(&server).context("Failed to register demo methods")?;

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    let engine = ProtocolEngine::new(Arc::clone(&server));

    tokio::select! {
        result = serve(engine, listener) => {
            result.context("Listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    server.shutdown();
    tracing::info!("Server stopped");
    Ok(())
}

fn register_demo(server: &Server) -> Result<()> {
    let items = server.publish("items", owner_filter())?;

    server.register_methods([
        (
            "echo",
            sync_handler(|args| Ok(args.into_iter().next().unwrap_or(Value::Null))),
        ),
        ("items.upsert", {
            let items = items.clone();
            sync_handler(move |args| {
                let id = string_arg(&args, 0, "id")?;
                let document = args.get(1).cloned().unwrap_or_default();
                items.upsert_json(id, document).map_err(MethodError::failed)?;
                Ok(Value::Null)
            })
        }),
        ("items.set", {
            let items = items.clone();
            sync_handler(move |args| {
                let id = string_arg(&args, 0, "id")?;
                let field = string_arg(&args, 1, "field")?;
                let value = args.get(2).cloned().unwrap_or_default();
                items.set_field(&id, field, value).map_err(MethodError::failed)?;
                Ok(Value::Null)
            })
        }),
        ("items.unset", {
            let items = items.clone();
            sync_handler(move |args| {
                let id = string_arg(&args, 0, "id")?;
                let field = string_arg(&args, 1, "field")?;
                items.unset_field(&id, &field).map_err(MethodError::failed)?;
                Ok(Value::Null)
            })
        }),
        (
            "items.remove",
            sync_handler(move |args| {
                let id = string_arg(&args, 0, "id")?;
                Ok(Value::Bool(items.remove(&id)))
            }),
        ),
    ])?;

    Ok(())
}

/// Filters by the `owner` key of the subscriber params, when present.
fn owner_filter() -> PredicateBundle {
    fn owner(params: &Value) -> Option<&Value> {
        params.as_object().and_then(|p| p.get("owner"))
    }
    fn matches(params: &Value, fields: &Fields) -> bool {
        owner(params).map_or(true, |owner| fields.get("owner") == Some(owner))
    }

    PredicateBundle::new()
        .snapshot(|params, documents| {
            documents
                .iter()
                .filter(|(_, fields)| matches(params, fields))
                .map(|(id, fields)| (id.clone(), fields.clone()))
                .collect()
        })
        .added(|params, _, fields| matches(params, fields))
}

fn string_arg(args: &[Value], index: usize, name: &str) -> Result<String, MethodError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MethodError::failed(format!("argument {index} ({name}) must be a string")))
}
