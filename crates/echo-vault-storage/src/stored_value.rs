// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! On-disk counterparts of `echo-vault-proto`'s [`Value`], serializable
//! via `serde`/`bincode`.
//!
//! `echo-vault-proto::Value` deliberately has no `serde` impl — its
//! encoding is the hand-rolled CBOR codec in that crate. The tree this
//! crate persists needs a `bincode`-friendly shape instead, so we keep a
//! parallel, smaller type here and convert at the boundary. Attribute
//! values are scalars, strings, bytes, tuples, maps, or arrays; a
//! `Slice`/`Node` value is never something a client stores as an
//! attribute, so those variants have no stored counterpart.

use echo_vault_proto::{ArrayValue, DType, Value};
use serde::{Deserialize, Serialize};

/// The on-disk array payload: dtype kept as its wire string rather than
/// `DType` directly, so this type has no dependency on `DType`'s own
/// representation staying stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArray {
    /// Wire dtype string, e.g. `"float64"`.
    pub dtype: String,
    /// Extent along each dimension.
    pub shape: Vec<u64>,
    /// Whether `bytes` is laid out column-major.
    pub fortran_order: bool,
    /// Raw element bytes.
    pub bytes: Vec<u8>,
}

impl From<&ArrayValue> for StoredArray {
    fn from(arr: &ArrayValue) -> Self {
        Self {
            dtype: arr.dtype.as_str().to_owned(),
            shape: arr.shape.clone(),
            fortran_order: arr.fortran_order,
            bytes: arr.bytes.clone(),
        }
    }
}

impl StoredArray {
    /// Converts back to the wire [`ArrayValue`], failing if the stored
    /// dtype string is no longer one this build supports.
    pub fn to_array_value(&self) -> Option<ArrayValue> {
        Some(ArrayValue {
            dtype: DType::parse(&self.dtype)?,
            shape: self.shape.clone(),
            fortran_order: self.fortran_order,
            bytes: self.bytes.clone(),
        })
    }

    /// Total element count implied by `shape`.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Whether this array has zero elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// On-disk counterpart of [`Value`], minus the response-only `Node`
/// extension and the request-only `Slice` extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    /// A 64-bit signed integer.
    Int(i64),
    /// A double-precision float.
    Float(f64),
    /// A UTF-8 string.
    Str(String),
    /// An opaque byte blob.
    Bytes(Vec<u8>),
    /// A boolean.
    Bool(bool),
    /// The absence of a value.
    Nil,
    /// An ordered, heterogeneous sequence.
    Tuple(Vec<StoredValue>),
    /// A string-keyed map, insertion order preserved.
    Map(Vec<(String, StoredValue)>),
    /// A dense N-dimensional array.
    Array(StoredArray),
}

/// Converts a wire [`Value`] to its stored form, if it is a kind that
/// can be persisted as an attribute.
#[must_use]
pub fn to_stored(value: &Value) -> Option<StoredValue> {
    Some(match value {
        Value::Int(n) => StoredValue::Int(*n),
        Value::Float(f) => StoredValue::Float(*f),
        Value::Str(s) => StoredValue::Str(s.clone()),
        Value::Bytes(b) => StoredValue::Bytes(b.clone()),
        Value::Bool(b) => StoredValue::Bool(*b),
        Value::Nil => StoredValue::Nil,
        Value::Tuple(items) => {
            StoredValue::Tuple(items.iter().map(to_stored).collect::<Option<_>>()?)
        }
        Value::Map(entries) => StoredValue::Map(
            entries
                .iter()
                .map(|(k, v)| to_stored(v).map(|sv| (k.clone(), sv)))
                .collect::<Option<_>>()?,
        ),
        Value::Array(arr) => StoredValue::Array(StoredArray::from(arr)),
        Value::Slice(_) | Value::Node(_) => return None,
    })
}

/// Converts a stored value back to its wire form.
#[must_use]
pub fn from_stored(stored: &StoredValue) -> Value {
    match stored {
        StoredValue::Int(n) => Value::Int(*n),
        StoredValue::Float(f) => Value::Float(*f),
        StoredValue::Str(s) => Value::Str(s.clone()),
        StoredValue::Bytes(b) => Value::Bytes(b.clone()),
        StoredValue::Bool(b) => Value::Bool(*b),
        StoredValue::Nil => Value::Nil,
        StoredValue::Tuple(items) => Value::Tuple(items.iter().map(from_stored).collect()),
        StoredValue::Map(entries) => {
            Value::Map(entries.iter().map(|(k, v)| (k.clone(), from_stored(v))).collect())
        }
        StoredValue::Array(arr) => arr
            .to_array_value()
            .map_or(Value::Nil, Value::Array),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_values_round_trip() {
        for v in [
            Value::Int(1),
            Value::Float(2.5),
            Value::Str("x".to_owned()),
            Value::Bool(true),
            Value::Nil,
        ] {
            let stored = to_stored(&v).unwrap();
            assert_eq!(from_stored(&stored), v);
        }
    }

    #[test]
    fn array_round_trips() {
        let arr = ArrayValue {
            dtype: DType::Int32,
            shape: vec![2],
            fortran_order: false,
            bytes: vec![0, 0, 0, 0, 1, 0, 0, 0],
        };
        let v = Value::Array(arr.clone());
        let stored = to_stored(&v).unwrap();
        assert_eq!(from_stored(&stored), v);
    }

    #[test]
    fn slice_has_no_stored_form() {
        let v = Value::Slice(echo_vault_proto::SliceValue::default());
        assert!(to_stored(&v).is_none());
    }
}
