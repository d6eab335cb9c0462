//! Deterministic JSON canonicalization.
//!
//! [`canonicalize`] is a total function from any `Serialize` value (over
//! a restricted JSON domain — null, bool, finite number, string, array,
//! object with string keys and no repeated key) to UTF-8 bytes: array
//! order is preserved, object keys are sorted lexicographically and
//! emitted without whitespace, and each field appears exactly once.
//! Equal abstract JSON values always produce identical bytes — this is
//! the sole pre-image used for envelope/reputation-record ids and
//! signatures.
//!
//! [`parse_strict`] additionally rejects raw JSON *text* that contains a
//! duplicate object key, which `serde_json`'s own parser silently
//! resolves last-write-wins on — the core invariant is stricter than
//! that.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use thiserror::Error;

/// Errors that make a value ineligible for canonicalization.
#[derive(Debug, Error, PartialEq)]
pub enum CanonError {
    #[error("number is not finite")]
    NonFiniteNumber,
    #[error("object key {0:?} appears more than once")]
    DuplicateKey(String),
    #[error("invalid JSON: {0}")]
    Parse(String),
    #[error("value cannot be represented in the canonical JSON domain")]
    Unrepresentable,
}

/// A JSON value restricted to the canonical domain, with object fields
/// kept in insertion order until canonicalization sorts them.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonValue {
    Null,
    Bool(bool),
    Number(CanonNumber),
    String(String),
    Array(Vec<CanonValue>),
    Object(Vec<(String, CanonValue)>),
}

/// A finite JSON number, retaining whether it was an integer or float so
/// re-serialization doesn't invent a trailing `.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanonNumber {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl CanonValue {
    /// Converts an already-constructed [`serde_json::Value`] into the
    /// canonical domain, rejecting non-finite numbers. Values built by
    /// serializing a Rust struct can never contain a duplicate object
    /// key (struct fields are unique by construction), so this path
    /// only re-validates numbers; [`parse_strict`] is the entry point
    /// that also checks untrusted raw JSON text for duplicate keys.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CanonError> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => Ok(Self::Number(CanonNumber::from_json_number(n)?)),
            serde_json::Value::String(s) => Ok(Self::String(s.clone())),
            serde_json::Value::Array(items) => {
                let items = items
                    .iter()
                    .map(Self::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Array(items))
            }
            serde_json::Value::Object(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (k, v) in map {
                    fields.push((k.clone(), Self::from_value(v)?));
                }
                Ok(Self::Object(fields))
            }
        }
    }

    /// Writes this value's canonical byte form: object keys sorted
    /// lexicographically, no whitespace, arrays in original order.
    pub fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.extend_from_slice(b"null"),
            Self::Bool(true) => out.extend_from_slice(b"true"),
            Self::Bool(false) => out.extend_from_slice(b"false"),
            Self::Number(n) => out.extend_from_slice(n.canonical_string().as_bytes()),
            Self::String(s) => write_json_string(s, out),
            Self::Array(items) => {
                out.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    item.write_canonical(out);
                }
                out.push(b']');
            }
            Self::Object(fields) => {
                // BTreeMap gives us lexicographic key order; later
                // duplicates (impossible via `from_value`, but cheap to
                // guard) simply overwrite earlier ones rather than
                // emitting the field twice.
                let sorted: BTreeMap<&str, &CanonValue> =
                    fields.iter().map(|(k, v)| (k.as_str(), v)).collect();
                out.push(b'{');
                for (i, (k, v)) in sorted.iter().enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    write_json_string(k, out);
                    out.push(b':');
                    v.write_canonical(out);
                }
                out.push(b'}');
            }
        }
    }

    /// Convenience: canonical bytes as a freshly allocated `Vec<u8>`.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_canonical(&mut out);
        out
    }
}

impl CanonNumber {
    fn from_json_number(n: &serde_json::Number) -> Result<Self, CanonError> {
        if let Some(i) = n.as_i64() {
            Ok(Self::Int(i))
        } else if let Some(u) = n.as_u64() {
            Ok(Self::UInt(u))
        } else if let Some(f) = n.as_f64() {
            if f.is_finite() {
                Ok(Self::Float(f))
            } else {
                Err(CanonError::NonFiniteNumber)
            }
        } else {
            Err(CanonError::NonFiniteNumber)
        }
    }

    fn canonical_string(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::UInt(u) => u.to_string(),
            // serde_json's own Display for f64 already produces the
            // shortest round-tripping decimal form, which is all a
            // deterministic canonical form needs.
            Self::Float(f) => {
                let n = serde_json::Number::from_f64(*f).expect("checked finite at construction");
                n.to_string()
            }
        }
    }
}

fn write_json_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
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

/// Canonicalizes any `Serialize` value, as long as its JSON projection
/// stays inside the restricted domain (no `NaN`/`Infinity`).
pub fn canonicalize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let json = serde_json::to_value(value).map_err(|_| CanonError::Unrepresentable)?;
    let canon = CanonValue::from_value(&json)?;
    Ok(canon.to_canonical_bytes())
}

/// Parses raw JSON text into the canonical domain, rejecting any object
/// that repeats a key — unlike `serde_json::from_str`, which silently
/// keeps the last occurrence.
pub fn parse_strict(text: &str) -> Result<CanonValue, CanonError> {
    let mut de = serde_json::Deserializer::from_str(text);
    let value = CanonValue::deserialize(&mut de).map_err(|e| CanonError::Parse(e.to_string()))?;
    // serde_json's Deserializer doesn't error on trailing garbage unless
    // asked to; `end()` catches e.g. `{"a":1}{"b":2}`.
    de.end().map_err(|e| CanonError::Parse(e.to_string()))?;
    Ok(value)
}

impl<'de> Deserialize<'de> for CanonValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(CanonValueVisitor)
    }
}

struct CanonValueVisitor;

impl<'de> Visitor<'de> for CanonValueVisitor {
    type Value = CanonValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON value in the canonical domain")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
        Ok(CanonValue::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(CanonValue::Number(CanonNumber::Int(v)))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(CanonValue::Number(CanonNumber::UInt(v)))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if !v.is_finite() {
            return Err(de::Error::custom("number is not finite"));
        }
        Ok(CanonValue::Number(CanonNumber::Float(v)))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
        Ok(CanonValue::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
        Ok(CanonValue::String(v))
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(CanonValue::Null)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(CanonValue::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        CanonValue::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(CanonValue::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut fields: Vec<(String, CanonValue)> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        while let Some((key, value)) = map.next_entry::<String, CanonValue>()? {
            if !seen.insert(key.clone()) {
                return Err(de::Error::custom(format!(
                    "object key {key:?} appears more than once"
                )));
            }
            fields.push((key, value));
        }
        Ok(CanonValue::Object(fields))
    }
}
