// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The self-describing payload model carried inside every frame body.
//!
//! [`Value`] is a superset of what CBOR gives us for free (ints, floats,
//! strings, bytes, bools, nil, ordered sequences, string-keyed maps) plus
//! three extensions the original protocol needed for numpy interop:
//! [`ArrayValue`], [`SliceValue`] and [`NodeDescriptor`]. Rather than add
//! CBOR tags (which `echo-session-proto`'s canonical codec forbids, and
//! which older clients of the original protocol never spoke), each
//! extension is carried as an ordinary map with one reserved key —
//! `__ndarray__`, `__slice__`, `__node__` — exactly as the original
//! `hurray/msgpack_ext.py` flagged numpy arrays and slices inside
//! msgpack. We keep the convention and change only the wire codec
//! underneath it, from msgpack to `ciborium`'s CBOR.

use crate::dtype::DType;
use ciborium::value::{Integer, Value as CborValue};
use thiserror::Error;

/// Reserved map key flagging an encoded [`ArrayValue`].
pub const KEY_NDARRAY: &str = "__ndarray__";
/// Reserved map key flagging an encoded [`SliceValue`].
pub const KEY_SLICE: &str = "__slice__";
/// Reserved map key flagging an encoded [`NodeDescriptor`].
pub const KEY_NODE: &str = "__node__";

/// Failures while encoding or decoding a [`Value`].
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The CBOR serializer rejected the value (should not happen for any
    /// [`Value`] this crate constructs).
    #[error("cbor encode error: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// The bytes were not well-formed CBOR.
    #[error("cbor decode error: {0}")]
    Decode(String),
    /// An integer in the CBOR stream did not fit in an `i64`.
    #[error("integer out of range")]
    IntegerRange,
    /// A map key was not a UTF-8 string (every map this protocol uses is
    /// string-keyed).
    #[error("map key was not a string")]
    NonStringKey,
    /// A value flagged with `__ndarray__`/`__slice__`/`__node__` did not
    /// have the shape that extension requires.
    #[error("malformed {0} extension payload")]
    MalformedExtension(&'static str),
    /// An array descriptor named a dtype string this server does not
    /// support.
    #[error("unsupported dtype {0:?}")]
    UnsupportedDType(String),
}

/// The kind of node a [`NodeDescriptor`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A group: a named container of child nodes.
    Group,
    /// A dataset: a named array of a single dtype.
    Dataset,
}

/// A rectangular array payload, carried as raw little-endian element
/// bytes alongside the descriptor needed to interpret them.
///
/// Mirrors the fields the original protocol derived from
/// `numpy.lib.format.header_data_from_array_1_0`: dtype name, shape,
/// fortran (column-major) order flag, and the raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    /// Element type.
    pub dtype: DType,
    /// Extent along each dimension.
    pub shape: Vec<u64>,
    /// Whether `bytes` is laid out column-major (Fortran order) rather
    /// than row-major (C order).
    pub fortran_order: bool,
    /// Raw element bytes, `dtype.item_size() * shape.iter().product()`
    /// long.
    pub bytes: Vec<u8>,
}

/// A Python-style `slice(start, stop, step)` triple, every field
/// optional (`None` meaning "unbounded"/"default").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceValue {
    /// Inclusive start index, or `None` for the beginning of the axis.
    pub start: Option<i64>,
    /// Exclusive stop index, or `None` for the end of the axis.
    pub stop: Option<i64>,
    /// Stride, or `None` for a stride of 1.
    pub step: Option<i64>,
}

/// A description of a node in the database tree, returned by
/// `get_node`/`get_tree`/`get_keys`-style responses. Never sent as a
/// request argument — this is a response-only extension.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
    /// Whether this node is a group or a dataset.
    pub kind: NodeKind,
    /// Absolute slash-separated path of the node within its database.
    pub path: String,
    /// Dataset shape; `None` for groups.
    pub shape: Option<Vec<u64>>,
    /// Dataset dtype; `None` for groups.
    pub dtype: Option<DType>,
}

/// The self-describing payload type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
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
    Tuple(Vec<Value>),
    /// A string-keyed map. Stored as an ordered `Vec` rather than a
    /// `BTreeMap`/`HashMap` because `attrs_keys` preserves insertion
    /// order (see SPEC_FULL.md, Open Questions) and a map type would
    /// lose it.
    Map(Vec<(String, Value)>),
    /// A dense N-dimensional array.
    Array(ArrayValue),
    /// A slice triple, as used by `slice_dataset`.
    Slice(SliceValue),
    /// A node description, as returned by node-inspection commands.
    Node(NodeDescriptor),
}

impl Value {
    /// Looks up `key` in a [`Value::Map`], returning `None` for any
    /// other variant or a missing key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Borrows this value as a string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrows this value as an i64, if it is one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

/// Encodes a [`Value`] to its canonical CBOR byte representation.
pub fn encode(value: &Value) -> Result<Vec<u8>, ProtoError> {
    let cbor = value_to_cbor(value);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&cbor, &mut out)?;
    Ok(out)
}

/// Decodes a [`Value`] from its CBOR byte representation.
pub fn decode(bytes: &[u8]) -> Result<Value, ProtoError> {
    let cbor: CborValue =
        ciborium::de::from_reader(bytes).map_err(|e| ProtoError::Decode(e.to_string()))?;
    cbor_to_value(cbor)
}

fn value_to_cbor(value: &Value) -> CborValue {
    match value {
        Value::Int(n) => CborValue::Integer(Integer::from(*n)),
        Value::Float(f) => CborValue::Float(*f),
        Value::Str(s) => CborValue::Text(s.clone()),
        Value::Bytes(b) => CborValue::Bytes(b.clone()),
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Nil => CborValue::Null,
        Value::Tuple(items) => CborValue::Array(items.iter().map(value_to_cbor).collect()),
        Value::Map(entries) => CborValue::Map(
            entries
                .iter()
                .map(|(k, v)| (CborValue::Text(k.clone()), value_to_cbor(v)))
                .collect(),
        ),
        Value::Array(arr) => CborValue::Map(encode_array(arr)),
        Value::Slice(slice) => CborValue::Map(encode_slice(slice)),
        Value::Node(node) => CborValue::Map(encode_node(node)),
    }
}

fn encode_array(arr: &ArrayValue) -> Vec<(CborValue, CborValue)> {
    vec![
        (
            CborValue::Text(KEY_NDARRAY.to_owned()),
            CborValue::Bool(true),
        ),
        (
            CborValue::Text("dtype".to_owned()),
            CborValue::Text(arr.dtype.as_str().to_owned()),
        ),
        (
            CborValue::Text("shape".to_owned()),
            CborValue::Array(
                arr.shape
                    .iter()
                    .map(|n| CborValue::Integer(Integer::from(*n)))
                    .collect(),
            ),
        ),
        (
            CborValue::Text("fortran_order".to_owned()),
            CborValue::Bool(arr.fortran_order),
        ),
        (
            CborValue::Text("data".to_owned()),
            CborValue::Bytes(arr.bytes.clone()),
        ),
    ]
}

fn encode_slice(slice: &SliceValue) -> Vec<(CborValue, CborValue)> {
    let encode_bound = |b: Option<i64>| b.map_or(CborValue::Null, |n| CborValue::Integer(n.into()));
    vec![(
        CborValue::Text(KEY_SLICE.to_owned()),
        CborValue::Array(vec![
            encode_bound(slice.start),
            encode_bound(slice.stop),
            encode_bound(slice.step),
        ]),
    )]
}

fn encode_node(node: &NodeDescriptor) -> Vec<(CborValue, CborValue)> {
    let mut entries = vec![
        (
            CborValue::Text(KEY_NODE.to_owned()),
            CborValue::Bool(true),
        ),
        (
            CborValue::Text("kind".to_owned()),
            CborValue::Text(
                match node.kind {
                    NodeKind::Group => "group",
                    NodeKind::Dataset => "dataset",
                }
                .to_owned(),
            ),
        ),
        (
            CborValue::Text("path".to_owned()),
            CborValue::Text(node.path.clone()),
        ),
    ];
    if let Some(shape) = &node.shape {
        entries.push((
            CborValue::Text("shape".to_owned()),
            CborValue::Array(
                shape
                    .iter()
                    .map(|n| CborValue::Integer(Integer::from(*n)))
                    .collect(),
            ),
        ));
    }
    if let Some(dtype) = node.dtype {
        entries.push((
            CborValue::Text("dtype".to_owned()),
            CborValue::Text(dtype.as_str().to_owned()),
        ));
    }
    entries
}

fn cbor_to_value(cbor: CborValue) -> Result<Value, ProtoError> {
    match cbor {
        CborValue::Integer(n) => {
            i64::try_from(n).map(Value::Int).map_err(|_| ProtoError::IntegerRange)
        }
        CborValue::Float(f) => Ok(Value::Float(f)),
        CborValue::Text(s) => Ok(Value::Str(s)),
        CborValue::Bytes(b) => Ok(Value::Bytes(b)),
        CborValue::Bool(b) => Ok(Value::Bool(b)),
        CborValue::Null => Ok(Value::Nil),
        CborValue::Array(items) => {
            let items = items
                .into_iter()
                .map(cbor_to_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Tuple(items))
        }
        CborValue::Map(entries) => decode_map(entries),
        other => Err(ProtoError::Decode(format!("unsupported cbor item: {other:?}"))),
    }
}

fn decode_map(entries: Vec<(CborValue, CborValue)>) -> Result<Value, ProtoError> {
    let has_key = |entries: &[(CborValue, CborValue)], key: &str| {
        entries
            .iter()
            .any(|(k, _)| matches!(k, CborValue::Text(s) if s == key))
    };

    if has_key(&entries, KEY_NDARRAY) {
        return decode_array(entries).map(Value::Array);
    }
    if has_key(&entries, KEY_SLICE) {
        return decode_slice(entries).map(Value::Slice);
    }
    if has_key(&entries, KEY_NODE) {
        return decode_node(entries).map(Value::Node);
    }

    let mut out = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let CborValue::Text(key) = k else {
            return Err(ProtoError::NonStringKey);
        };
        out.push((key, cbor_to_value(v)?));
    }
    Ok(Value::Map(out))
}

fn field<'a>(entries: &'a [(CborValue, CborValue)], key: &str) -> Option<&'a CborValue> {
    entries
        .iter()
        .find(|(k, _)| matches!(k, CborValue::Text(s) if s == key))
        .map(|(_, v)| v)
}

fn decode_array(entries: Vec<(CborValue, CborValue)>) -> Result<ArrayValue, ProtoError> {
    let dtype_str = match field(&entries, "dtype") {
        Some(CborValue::Text(s)) => s.clone(),
        _ => return Err(ProtoError::MalformedExtension("ndarray")),
    };
    let dtype = DType::parse(&dtype_str).ok_or(ProtoError::UnsupportedDType(dtype_str))?;
    let shape = match field(&entries, "shape") {
        Some(CborValue::Array(items)) => items
            .iter()
            .map(|v| match v {
                CborValue::Integer(n) => {
                    u64::try_from(*n).map_err(|_| ProtoError::MalformedExtension("ndarray"))
                }
                _ => Err(ProtoError::MalformedExtension("ndarray")),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(ProtoError::MalformedExtension("ndarray")),
    };
    let fortran_order = match field(&entries, "fortran_order") {
        Some(CborValue::Bool(b)) => *b,
        _ => return Err(ProtoError::MalformedExtension("ndarray")),
    };
    let bytes = match field(&entries, "data") {
        Some(CborValue::Bytes(b)) => b.clone(),
        _ => return Err(ProtoError::MalformedExtension("ndarray")),
    };
    Ok(normalize_order(ArrayValue {
        dtype,
        shape,
        fortran_order,
        bytes,
    }))
}

/// Reconstitutes a Fortran-order array's bytes in C (row-major) order,
/// keeping the declared shape (SPEC_FULL.md §4.2). The original
/// protocol's `msgpack_ext.py` does the analogous
/// `arr.shape = shape[::-1]; arr = arr.transpose()` — reversing the
/// shape alone would return the *transpose*, not the original array, so
/// the flat buffer has to be re-walked element by element.
fn normalize_order(array: ArrayValue) -> ArrayValue {
    if !array.fortran_order {
        return array;
    }
    let bytes = fortran_to_c_order(&array.bytes, &array.shape, array.dtype.item_size());
    ArrayValue {
        dtype: array.dtype,
        shape: array.shape,
        fortran_order: false,
        bytes,
    }
}

/// Reorders a flat Fortran-order (column-major, first axis fastest)
/// buffer into C-order (row-major, last axis fastest) for the same
/// `shape`, element by element.
fn fortran_to_c_order(bytes: &[u8], shape: &[u64], item_size: usize) -> Vec<u8> {
    let rank = shape.len();
    let count: usize = shape.iter().product::<u64>() as usize;
    let mut out = vec![0u8; count * item_size];
    if rank == 0 {
        out.copy_from_slice(&bytes[..count * item_size]);
        return out;
    }

    let mut fortran_strides = vec![1usize; rank];
    for axis in 1..rank {
        fortran_strides[axis] = fortran_strides[axis - 1] * shape[axis - 1] as usize;
    }

    let mut index = vec![0u64; rank];
    for c_offset in 0..count {
        let fortran_offset: usize = index
            .iter()
            .zip(&fortran_strides)
            .map(|(i, stride)| *i as usize * stride)
            .sum();
        let src = fortran_offset * item_size;
        let dst = c_offset * item_size;
        out[dst..dst + item_size].copy_from_slice(&bytes[src..src + item_size]);

        for axis in (0..rank).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

fn decode_slice(entries: Vec<(CborValue, CborValue)>) -> Result<SliceValue, ProtoError> {
    let triple = match field(&entries, KEY_SLICE) {
        Some(CborValue::Array(items)) if items.len() == 3 => items,
        _ => return Err(ProtoError::MalformedExtension("slice")),
    };
    let bound = |v: &CborValue| -> Result<Option<i64>, ProtoError> {
        match v {
            CborValue::Null => Ok(None),
            CborValue::Integer(n) => {
                i64::try_from(*n).map(Some).map_err(|_| ProtoError::IntegerRange)
            }
            _ => Err(ProtoError::MalformedExtension("slice")),
        }
    };
    Ok(SliceValue {
        start: bound(&triple[0])?,
        stop: bound(&triple[1])?,
        step: bound(&triple[2])?,
    })
}

fn decode_node(entries: Vec<(CborValue, CborValue)>) -> Result<NodeDescriptor, ProtoError> {
    let kind = match field(&entries, "kind") {
        Some(CborValue::Text(s)) if s == "group" => NodeKind::Group,
        Some(CborValue::Text(s)) if s == "dataset" => NodeKind::Dataset,
        _ => return Err(ProtoError::MalformedExtension("node")),
    };
    let path = match field(&entries, "path") {
        Some(CborValue::Text(s)) => s.clone(),
        _ => return Err(ProtoError::MalformedExtension("node")),
    };
    let shape = match field(&entries, "shape") {
        Some(CborValue::Array(items)) => Some(
            items
                .iter()
                .map(|v| match v {
                    CborValue::Integer(n) => {
                        u64::try_from(*n).map_err(|_| ProtoError::MalformedExtension("node"))
                    }
                    _ => Err(ProtoError::MalformedExtension("node")),
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => None,
        _ => return Err(ProtoError::MalformedExtension("node")),
    };
    let dtype = match field(&entries, "dtype") {
        Some(CborValue::Text(s)) => Some(DType::parse(s).ok_or_else(|| ProtoError::UnsupportedDType(s.clone()))?),
        None => None,
        _ => return Err(ProtoError::MalformedExtension("node")),
    };
    Ok(NodeDescriptor {
        kind,
        path,
        shape,
        dtype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_values_round_trip() {
        for v in [
            Value::Int(-7),
            Value::Float(1.5),
            Value::Str("hello".to_owned()),
            Value::Bytes(vec![1, 2, 3]),
            Value::Bool(true),
            Value::Nil,
        ] {
            let bytes = encode(&v).unwrap();
            assert_eq!(decode(&bytes).unwrap(), v);
        }
    }

    #[test]
    fn tuple_and_map_round_trip() {
        let v = Value::Tuple(vec![Value::Int(1), Value::Str("a".to_owned())]);
        assert_eq!(decode(&encode(&v).unwrap()).unwrap(), v);

        let m = Value::Map(vec![
            ("a".to_owned(), Value::Int(1)),
            ("b".to_owned(), Value::Bool(false)),
        ]);
        assert_eq!(decode(&encode(&m).unwrap()).unwrap(), m);
    }

    #[test]
    fn array_round_trips_with_extension_marker() {
        let arr = ArrayValue {
            dtype: DType::Float64,
            shape: vec![2, 3],
            fortran_order: false,
            bytes: vec![0u8; 8 * 6],
        };
        let v = Value::Array(arr.clone());
        let bytes = encode(&v).unwrap();
        match decode(&bytes).unwrap() {
            Value::Array(decoded) => assert_eq!(decoded, arr),
            other => panic!("expected Value::Array, got {other:?}"),
        }
    }

    #[test]
    fn fortran_order_array_keeps_its_declared_shape_on_decode() {
        // Column-major buffer for a (2, 3) array where v[i][j] = i*10 + j.
        let mut fortran_bytes = Vec::new();
        for j in 0..3i32 {
            for i in 0..2i32 {
                fortran_bytes.extend_from_slice(&(i * 10 + j).to_le_bytes());
            }
        }
        let arr = ArrayValue {
            dtype: DType::Int32,
            shape: vec![2, 3],
            fortran_order: true,
            bytes: fortran_bytes,
        };
        let bytes = encode(&Value::Array(arr)).unwrap();
        match decode(&bytes).unwrap() {
            Value::Array(decoded) => {
                assert_eq!(decoded.shape, vec![2, 3]);
                assert!(!decoded.fortran_order);
                let values: Vec<i32> = decoded
                    .bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                assert_eq!(values, vec![0, 1, 2, 10, 11, 12]);
            }
            other => panic!("expected Value::Array, got {other:?}"),
        }
    }

    #[test]
    fn slice_with_open_bounds_round_trips() {
        let s = SliceValue {
            start: Some(1),
            stop: None,
            step: Some(2),
        };
        let v = Value::Slice(s);
        assert_eq!(decode(&encode(&v).unwrap()).unwrap(), v);
    }

    #[test]
    fn node_descriptor_round_trips() {
        let node = NodeDescriptor {
            kind: NodeKind::Dataset,
            path: "/a/b".to_owned(),
            shape: Some(vec![4]),
            dtype: Some(DType::Int32),
        };
        let v = Value::Node(node.clone());
        match decode(&encode(&v).unwrap()).unwrap() {
            Value::Node(decoded) => assert_eq!(decoded, node),
            other => panic!("expected Value::Node, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_dtype_is_rejected() {
        let entries = vec![
            (CborValue::Text(KEY_NDARRAY.to_owned()), CborValue::Bool(true)),
            (
                CborValue::Text("dtype".to_owned()),
                CborValue::Text("complex128".to_owned()),
            ),
            (
                CborValue::Text("shape".to_owned()),
                CborValue::Array(vec![]),
            ),
            (
                CborValue::Text("fortran_order".to_owned()),
                CborValue::Bool(false),
            ),
            (CborValue::Text("data".to_owned()), CborValue::Bytes(vec![])),
        ];
        let err = decode_map(entries).unwrap_err();
        assert!(matches!(err, ProtoError::UnsupportedDType(_)));
    }
}
