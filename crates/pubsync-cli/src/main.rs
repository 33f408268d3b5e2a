//! # pubsync CLI
//!
//! Command-line utilities for building and inspecting pubsync frames.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use pubsync_proto::{ejson, ClientMessage, Codec};
use serde_json::Value;
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "encode" => {
            if args.len() < 3 {
                eprintln!("Usage: pubsync encode <json>");
                std::process::exit(1);
            }
            let message: ClientMessage =
                serde_json::from_str(&args[2]).context("Not a valid client message")?;
            let frame = Codec::Cbor
                .encode(&message)
                .context("Failed to encode frame")?;
            println!("{}", STANDARD.encode(frame));
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: pubsync decode <base64>");
                std::process::exit(1);
            }
            let frame = STANDARD
                .decode(args[2].trim())
                .context("Input is not valid base64")?;
            let value: Value = Codec::Cbor
                .decode_frame(&frame)
                .context("Failed to decode frame")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        "date" => {
            if args.len() < 3 {
                eprintln!("Usage: pubsync date <rfc3339>");
                std::process::exit(1);
            }
            let at = DateTime::parse_from_rfc3339(&args[2])
                .context("Not an RFC 3339 timestamp")?
                .with_timezone(&Utc);
            println!("{}", ejson::date(at));
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"pubsync CLI

USAGE:
    pubsync <COMMAND> [OPTIONS]

COMMANDS:
    encode <json>      Encode a client message as a base64 CBOR frame
    decode <base64>    Decode a base64 CBOR frame to JSON
    date <rfc3339>     Print a timestamp in extended JSON form
    help               Show this help message

EXAMPLES:
    pubsync encode '{{"msg":"ping","id":"1"}}'
    pubsync decode "AAAAD6JjbXNnZHBpbmdiaWRhMQ=="
    pubsync date 2024-01-01T00:00:00Z
"#
    );
}
