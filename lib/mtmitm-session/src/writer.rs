// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Renders a finished tunnel's [`MessageRecord`] log to the on-disk JSON
//! document shape and picks its output filename.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mtmitm_tl::{Object, Value};
use num_bigint::BigUint;
use serde_json::{Map, Value as Json};

use crate::record::MessageRecord;

const MAX_SAFE_INTEGER: i64 = (1i64 << 53) - 1;

fn json_i64(n: i64) -> Json {
    if n.unsigned_abs() <= MAX_SAFE_INTEGER as u64 {
        Json::from(n)
    } else {
        Json::String(n.to_string())
    }
}

fn json_u64(n: u64) -> Json {
    if n <= MAX_SAFE_INTEGER as u64 {
        Json::from(n)
    } else {
        Json::String(n.to_string())
    }
}

/// `int128`/`int256` fields are wire-order little-endian magnitudes
/// (fingerprints, nonces); always too large for a JSON number, so they
/// always render as a decimal string.
fn json_big_bytes(bytes: &[u8]) -> Json {
    Json::String(BigUint::from_bytes_le(bytes).to_string())
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Int(n) => Json::from(*n),
        Value::Long(n) => json_i64(*n),
        Value::Int128(b) => json_big_bytes(b),
        Value::Int256(b) => json_big_bytes(b),
        Value::Double(n) => serde_json::Number::from_f64(*n).map(Json::Number).unwrap_or(Json::Null),
        Value::Bool(b) => Json::from(*b),
        Value::Bytes(b) => Json::String(hex::encode(b)),
        Value::Str(s) => Json::String(s.clone()),
        Value::Vector(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Object(obj) => Json::Object(object_to_json(obj)),
    }
}

fn object_to_json(obj: &Object) -> Map<String, Json> {
    let mut map = Map::with_capacity(obj.fields.len() + 2);
    map.insert("_id".into(), Json::String(format!("{:#010x}", obj.id)));
    map.insert("_name".into(), Json::String(obj.name.clone()));
    for (name, value) in &obj.fields {
        map.insert(name.clone(), value_to_json(value));
    }
    map
}

fn record_to_json(record: &MessageRecord) -> Json {
    let mut metadata = Map::with_capacity(6);
    metadata.insert("auth_key_id".into(), json_u64(record.metadata.auth_key_id));
    metadata.insert(
        "message_id".into(),
        record.metadata.message_id.map(json_i64).unwrap_or(Json::Null),
    );
    metadata.insert(
        "session_id".into(),
        record.metadata.session_id.map(json_i64).unwrap_or(Json::Null),
    );
    metadata.insert("salt".into(), record.metadata.salt.map(json_i64).unwrap_or(Json::Null));
    metadata.insert(
        "seq_no".into(),
        record.metadata.seq_no.map(Json::from).unwrap_or(Json::Null),
    );
    metadata.insert(
        "msg_key".into(),
        record
            .metadata
            .msg_key
            .map(|k| Json::String(hex::encode(k)))
            .unwrap_or(Json::Null),
    );

    let mut entry = Map::with_capacity(3);
    entry.insert("metadata".into(), Json::Object(metadata));
    entry.insert(
        "object".into(),
        record.object.as_ref().map(value_to_json).unwrap_or(Json::Null),
    );
    entry.insert(
        "raw_data".into(),
        record
            .raw_data
            .as_ref()
            .map(|bytes| Json::String(STANDARD.encode(bytes)))
            .unwrap_or(Json::Null),
    );
    Json::Object(entry)
}

pub fn records_to_document(records: &[MessageRecord]) -> Json {
    Json::Array(records.iter().map(record_to_json).collect())
}

/// The last four hex digits of a session's id, used to disambiguate
/// filenames sharing the same millisecond.
fn sid4(records: &[MessageRecord]) -> String {
    records
        .last()
        .and_then(|r| r.metadata.session_id)
        .map(|id| format!("{:04x}", (id as u64) & 0xFFFF))
        .unwrap_or_else(|| "0000".into())
}

/// Writes a finished tunnel's session log to `<output_dir>/<unix_ms>_<sid4>.json`
/// and returns the path written. Does nothing (and returns `Ok` with no
/// path) if `records` is empty — there's nothing worth persisting.
pub fn write_session(output_dir: &Path, records: &[MessageRecord]) -> io::Result<Option<PathBuf>> {
    if records.is_empty() {
        return Ok(None);
    }

    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before epoch")
        .as_millis();

    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{unix_ms}_{}.json", sid4(records)));
    let document = records_to_document(records);
    fs::write(&path, serde_json::to_vec_pretty(&document)?)?;
    Ok(Some(path))
}
