// cose-cwt: COSE messages and CBOR Web Tokens
// Copyright 2025 Dark Bio AG. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Thin CBOR layer over ciborium's dynamic value model.
//!
//! https://datatracker.ietf.org/doc/html/rfc8949

use ciborium::{de, ser};
use std::fmt;

pub use ciborium::Value;

/// Error is the failures that can occur while encoding or decoding CBOR.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("unexpected trailing bytes: {0}")]
    TrailingBytes(usize),
}

/// Label is a CBOR map key as used by COSE headers, COSE keys and CWT claims.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Label {
    Int(i64),
    Text(String),
}

impl Label {
    /// from_value converts a map key into a label, returning None if it is
    /// neither an integer nor a text string.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(_) => int(value).map(Label::Int),
            Value::Text(text) => Some(Label::Text(text.clone())),
            _ => None,
        }
    }

    /// to_value converts the label into a CBOR value.
    pub fn to_value(&self) -> Value {
        match self {
            Label::Int(n) => Value::from(*n),
            Label::Text(text) => Value::Text(text.clone()),
        }
    }
}

impl From<i64> for Label {
    fn from(n: i64) -> Self {
        Label::Int(n)
    }
}

impl From<&str> for Label {
    fn from(text: &str) -> Self {
        Label::Text(text.to_string())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Int(n) => write!(f, "{n}"),
            Label::Text(text) => write!(f, "{text:?}"),
        }
    }
}

/// encode CBOR encodes a value into a freshly allocated byte slice. It's
/// sugar-coating to avoid having to manually do the boilerplate allocations.
pub fn encode(value: &Value) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    ser::into_writer(value, &mut buf).map_err(|e| Error::Encode(e.to_string()))?;
    Ok(buf)
}

/// decode CBOR decodes a byte slice into a dynamic value, ensuring that all
/// data is fully consumed.
pub fn decode(blob: &[u8]) -> Result<Value, Error> {
    let mut rest = blob;
    let value: Value = de::from_reader(&mut rest).map_err(|e| Error::Decode(e.to_string()))?;
    if !rest.is_empty() {
        return Err(Error::TrailingBytes(rest.len()));
    }
    Ok(value)
}

/// canonical_map builds a map value with its entries in deterministic order,
/// sorted bytewise by the encoding of their keys.
pub fn canonical_map(mut entries: Vec<(Value, Value)>) -> Result<Value, Error> {
    let mut keyed = Vec::with_capacity(entries.len());
    for (key, value) in entries.drain(..) {
        keyed.push((encode(&key)?, key, value));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect()))
}

/// int extracts an integer that fits into an i64.
pub fn int(value: &Value) -> Option<i64> {
    value.as_integer().and_then(|n| i64::try_from(n).ok())
}

/// bytes extracts a byte string.
pub fn bytes(value: &Value) -> Option<&[u8]> {
    value.as_bytes().map(|b| b.as_slice())
}

/// bstr wraps a byte slice into a byte string value.
pub fn bstr(data: &[u8]) -> Value {
    Value::Bytes(data.to_vec())
}
