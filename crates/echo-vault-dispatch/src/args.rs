// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pulls typed arguments out of a request's keyword map and `data`
//! payload. Every function here is forgiving about *shape* (it never
//! panics on an unexpected [`Value`] variant) and leaves the caller to
//! turn `None` into the right [`Status`] for its own argument.

use echo_vault_proto::{ArrayValue, DType, SliceValue, Value};

/// Interprets a `shape` keyword argument, a tuple of non-negative
/// integers.
pub(crate) fn as_shape(value: &Value) -> Option<Vec<u64>> {
    match value {
        Value::Tuple(items) => items
            .iter()
            .map(|v| v.as_int().and_then(|n| u64::try_from(n).ok()))
            .collect(),
        _ => None,
    }
}

/// Interprets a `dtype` keyword argument, a dtype name string.
pub(crate) fn as_dtype(value: &Value) -> Option<DType> {
    value.as_str().and_then(DType::parse)
}

/// Interprets a `data` payload as an array, if it is one.
pub(crate) fn as_array(value: &Value) -> Option<ArrayValue> {
    match value {
        Value::Array(arr) => Some(arr.clone()),
        _ => None,
    }
}

/// Interprets a `key` keyword argument as a slice triple. The original
/// protocol's clients send `key` as either a bare slice, a one-element
/// tuple wrapping one (axis-0 indexing), an empty tuple (the full axis),
/// or a bare integer (a one-row window) — `slice_dataset`/
/// `broadcast_dataset` only support axis 0, so every other shape of
/// `key` is a caller error this function reports as `None`.
pub(crate) fn as_slice(value: &Value) -> Option<SliceValue> {
    match value {
        Value::Slice(slice) => Some(*slice),
        Value::Tuple(items) => match items.as_slice() {
            [] => Some(SliceValue::default()),
            [single] => as_slice(single),
            _ => None,
        },
        Value::Int(i) => Some(SliceValue {
            start: Some(*i),
            stop: Some(i.checked_add(1)?),
            step: Some(1),
        }),
        _ => None,
    }
}

/// Builds a zero-filled array of the given dtype/shape, for
/// `create_dataset`/`require_dataset` calls that name a shape/dtype but
/// carry no `data` payload.
pub(crate) fn zero_array(dtype: DType, shape: Vec<u64>) -> ArrayValue {
    let count: u64 = shape.iter().product();
    let bytes = vec![0u8; (count as usize) * dtype.item_size()];
    ArrayValue {
        dtype,
        shape,
        fortran_order: false,
        bytes,
    }
}

/// Interprets a `overwrite` keyword argument as a boolean, defaulting to
/// `false` when absent (the original protocol's truthiness rules reduce
/// to "present and true" for this server's purposes).
pub(crate) fn as_bool(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(true)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_reads_a_tuple_of_ints() {
        let v = Value::Tuple(vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(as_shape(&v), Some(vec![2, 3]));
    }

    #[test]
    fn shape_rejects_non_tuples() {
        assert_eq!(as_shape(&Value::Int(4)), None);
    }

    #[test]
    fn dtype_parses_a_known_name() {
        assert_eq!(as_dtype(&Value::Str("int32".to_owned())), Some(DType::Int32));
        assert_eq!(as_dtype(&Value::Str("complex128".to_owned())), None);
    }

    #[test]
    fn slice_unwraps_a_singleton_tuple() {
        let slice = SliceValue { start: Some(0), stop: Some(1), step: None };
        let v = Value::Tuple(vec![Value::Slice(slice)]);
        assert_eq!(as_slice(&v), Some(slice));
    }

    #[test]
    fn slice_empty_tuple_is_the_full_axis() {
        assert_eq!(as_slice(&Value::Tuple(vec![])), Some(SliceValue::default()));
    }

    #[test]
    fn slice_bare_int_is_a_one_row_window() {
        assert_eq!(
            as_slice(&Value::Int(3)),
            Some(SliceValue { start: Some(3), stop: Some(4), step: Some(1) })
        );
    }

    #[test]
    fn slice_rejects_multi_axis_tuples() {
        let v = Value::Tuple(vec![Value::Int(0), Value::Int(1)]);
        assert_eq!(as_slice(&v), None);
    }

    #[test]
    fn overwrite_defaults_to_false() {
        assert!(!as_bool(None));
        assert!(!as_bool(Some(&Value::Bool(false))));
        assert!(as_bool(Some(&Value::Bool(true))));
    }
}
