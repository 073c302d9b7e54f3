//! Deterministic canonical serialization.
//!
//! Two independent implementations must emit byte-identical output for the
//! same semantic input, otherwise every downstream hash diverges. This module
//! is the single seam through which all signature-covered and hash-covered
//! structures pass:
//!
//! - [`Record`]: a parsed tabular row (positional or keyed), encoded with the
//!   `0x1F` unit separator.
//! - [`canonical_json_bytes`]: whitespace-free JSON with object keys sorted
//!   by byte order, used for hashing manifests, payloads, and receipts.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha512};
use thiserror::Error;

/// Byte joining fields of a canonicalized record.
pub const UNIT_SEPARATOR: u8 = 0x1F;

/// Nesting bound for canonical JSON emission. Documents deeper than this are
/// rejected rather than recursed into.
pub const MAX_CANONICAL_DEPTH: usize = 128;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("non-finite number cannot be canonicalized")]
    NonFinite,
    #[error("nesting depth exceeds {MAX_CANONICAL_DEPTH}")]
    DepthExceeded,
    #[error("value conversion: {0}")]
    Convert(#[from] serde_json::Error),
}

/// A structured record destined for a leaf.
///
/// Tabular sources produce rows either as ordered value sequences or as
/// key-value mappings; the two shapes canonicalize differently and the tag
/// keeps the dispatch explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Ordered values; `None` marks an absent cell.
    Positional(Vec<Option<String>>),
    /// Key-value pairs in source order; canonicalization sorts them.
    Keyed(Vec<(String, String)>),
}

impl Record {
    /// Build a record from a parsed JSON row (array or object shape).
    ///
    /// Scalars are stringified the same way in both shapes: strings pass
    /// through, numbers and booleans print their JSON form, null is absent.
    #[must_use]
    pub fn from_json_row(row: &Value) -> Self {
        match row {
            Value::Array(items) => Record::Positional(items.iter().map(stringify_cell).collect()),
            Value::Object(map) => Record::Keyed(
                map.iter()
                    .map(|(k, v)| (k.clone(), stringify_cell(v).unwrap_or_default()))
                    .collect(),
            ),
            other => Record::Positional(vec![stringify_cell(other)]),
        }
    }
}

fn stringify_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // Nested structure inside a cell keeps its canonical JSON form.
        nested => canonical_json_bytes(nested)
            .ok()
            .map(|b| String::from_utf8_lossy(&b).into_owned()),
    }
}

/// Canonical byte encoding of a record.
///
/// Positional: values joined with `0x1F`, absent cells as empty strings.
/// Keyed: pairs sorted by lexicographic byte order of the key, each emitted
/// as `key=value`, joined with `0x1F`.
#[must_use]
pub fn canonical_record_bytes(record: &Record) -> Vec<u8> {
    let mut out = Vec::new();
    match record {
        Record::Positional(values) => {
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(UNIT_SEPARATOR);
                }
                if let Some(v) = value {
                    out.extend_from_slice(v.as_bytes());
                }
            }
        }
        Record::Keyed(pairs) => {
            let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
            sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            for (i, (key, value)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(UNIT_SEPARATOR);
                }
                out.extend_from_slice(key.as_bytes());
                out.push(b'=');
                out.extend_from_slice(value.as_bytes());
            }
        }
    }
    out
}

/// Wrap a finite `f64` as a JSON number. NaN and infinities have no JSON
/// representation and are rejected here, at the construction seam.
pub fn canonical_number(value: f64) -> Result<Value, CanonicalError> {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or(CanonicalError::NonFinite)
}

/// Emit canonical JSON bytes: no whitespace, object keys sorted by byte
/// order, arrays in order, minimal string escapes.
pub fn canonical_json_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    let mut out = Vec::new();
    write_value(&mut out, value, 0)?;
    Ok(out)
}

/// Canonical JSON bytes of any serializable structure.
pub fn canonical_json_of<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let tree = serde_json::to_value(value)?;
    canonical_json_bytes(&tree)
}

/// Lowercase-hex SHA-512 of the canonical JSON encoding.
pub fn canonical_sha512_hex<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    Ok(hex::encode(Sha512::digest(canonical_json_of(value)?)))
}

fn write_value(out: &mut Vec<u8>, value: &Value, depth: usize) -> Result<(), CanonicalError> {
    if depth > MAX_CANONICAL_DEPTH {
        return Err(CanonicalError::DepthExceeded);
    }
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_escaped(out, s),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item, depth + 1)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_escaped(out, key);
                out.push(b':');
                write_value(out, &map[key], depth + 1)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_escaped(out: &mut Vec<u8>, s: &str) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0c}' => out.extend_from_slice(b"\\f"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}
