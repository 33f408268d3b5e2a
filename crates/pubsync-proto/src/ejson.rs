//! Extended values carried inside JSON.
//!
//! Plain JSON has no date or binary type. These are encoded as single-key
//! objects:
//! - `{"$date": <milliseconds since UNIX epoch>}`
//! - `{"$binary": "<standard base64>"}`
//!
//! Both survive the JSON and CBOR codecs unchanged.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

const DATE_KEY: &str = "$date";
const BINARY_KEY: &str = "$binary";

/// Encode a timestamp.
#[must_use]
pub fn date(at: DateTime<Utc>) -> Value {
    json!({ DATE_KEY: at.timestamp_millis() })
}

/// Decode a timestamp, if `value` is an encoded date.
#[must_use]
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    let millis = single_entry(value, DATE_KEY)?.as_i64()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Encode raw bytes.
#[must_use]
pub fn binary(bytes: &[u8]) -> Value {
    json!({ BINARY_KEY: STANDARD.encode(bytes) })
}

/// Decode raw bytes, if `value` is encoded binary.
#[must_use]
pub fn as_binary(value: &Value) -> Option<Vec<u8>> {
    let encoded = single_entry(value, BINARY_KEY)?.as_str()?;
    STANDARD.decode(encoded).ok()
}

/// Check whether `value` uses one of the extended encodings.
#[must_use]
pub fn is_extended(value: &Value) -> bool {
    as_date(value).is_some() || as_binary(value).is_some()
}

fn single_entry<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get(key)
}
