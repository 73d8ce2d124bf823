// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `NodeTree`: the in-memory, whole-file-serialized stand-in for the
//! external HDF5-like array container the original protocol talked to
//! through `h5pyswmr`.
//!
//! A database is one file on disk holding one bincode-encoded
//! [`Container`]: a tree of groups (ordered child maps) and datasets
//! (dtype + shape + raw bytes + attributes), rooted at `"/"`. Every
//! mutating operation rewrites the whole file; this is only safe because
//! the caller already holds the resource's exclusive write lock (see
//! `echo-vault-lock`) for the whole duration of the call — the same
//! justification `examples/other_examples/*forest*car/plain.rs` uses for
//! treating "the container" as one file worth rewriting wholesale rather
//! than maintaining an index.

use crate::error::StorageError;
use crate::stored_value::{from_stored, to_stored, StoredArray, StoredValue};
use echo_vault_proto::{ArrayValue, DType, NodeDescriptor, NodeKind, SliceValue, Value};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One node in the database tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// An ordered container of child nodes.
    Group {
        /// Attributes attached to this group.
        attrs: Vec<(String, StoredValue)>,
        /// Children, in insertion order.
        children: Vec<(String, TreeNode)>,
    },
    /// A single dense array.
    Dataset {
        /// Attributes attached to this dataset.
        attrs: Vec<(String, StoredValue)>,
        /// The array itself.
        array: StoredArray,
    },
}

impl TreeNode {
    fn new_group() -> Self {
        Self::Group {
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    fn attrs(&self) -> &[(String, StoredValue)] {
        match self {
            Self::Group { attrs, .. } | Self::Dataset { attrs, .. } => attrs,
        }
    }

    fn attrs_mut(&mut self) -> &mut Vec<(String, StoredValue)> {
        match self {
            Self::Group { attrs, .. } | Self::Dataset { attrs, .. } => attrs,
        }
    }

    fn kind(&self) -> NodeKind {
        match self {
            Self::Group { .. } => NodeKind::Group,
            Self::Dataset { .. } => NodeKind::Dataset,
        }
    }

    fn child(&self, name: &str) -> Option<&TreeNode> {
        match self {
            Self::Group { children, .. } => children.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            Self::Dataset { .. } => None,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut TreeNode> {
        match self {
            Self::Group { children, .. } => children
                .iter_mut()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v),
            Self::Dataset { .. } => None,
        }
    }
}

/// The on-disk root of a single database file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Container {
    root: TreeNode,
}

impl Container {
    fn empty() -> Self {
        Self {
            root: TreeNode::new_group(),
        }
    }
}

/// An open database: the deserialized [`Container`] plus the path it was
/// loaded from and will be saved back to.
pub struct NodeTree {
    path: PathBuf,
    container: Container,
}

fn split_path(path: &str) -> Result<Vec<&str>, StorageError> {
    if !path.starts_with('/') {
        return Err(StorageError::InvalidPath(path.to_owned()));
    }
    Ok(path.split('/').filter(|s| !s.is_empty()).collect())
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

impl NodeTree {
    /// Creates a brand-new, empty database file.
    ///
    /// # Errors
    /// Returns [`StorageError::FileExists`] if a file is already at
    /// `path`.
    pub fn create(path: &Path) -> Result<(), StorageError> {
        if path.exists() {
            return Err(StorageError::FileExists);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let container = Container::empty();
        let bytes = bincode::serialize(&container)?;
        write_atomically(path, &bytes)
    }

    /// Opens an existing database file, decoding its whole tree into
    /// memory.
    ///
    /// # Errors
    /// Returns [`StorageError::FileNotFound`] if no file is at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if !path.is_file() {
            return Err(StorageError::FileNotFound);
        }
        let bytes = fs::read(path)?;
        let container: Container = bincode::deserialize(&bytes)?;
        Ok(Self {
            path: path.to_path_buf(),
            container,
        })
    }

    /// Rewrites the whole database file with the current in-memory tree.
    pub fn save(&self) -> Result<(), StorageError> {
        let bytes = bincode::serialize(&self.container)?;
        write_atomically(&self.path, &bytes)
    }

    /// Size in bytes of the underlying file as currently persisted.
    pub fn filesize(path: &Path) -> Result<u64, StorageError> {
        if !path.is_file() {
            return Err(StorageError::FileNotFound);
        }
        Ok(fs::metadata(path)?.len())
    }

    fn navigate(&self, segments: &[&str]) -> Option<&TreeNode> {
        let mut node = &self.container.root;
        for seg in segments {
            node = node.child(seg)?;
        }
        Some(node)
    }

    fn navigate_mut(&mut self, segments: &[&str]) -> Option<&mut TreeNode> {
        let mut node = &mut self.container.root;
        for seg in segments {
            node = node.child_mut(seg)?;
        }
        Some(node)
    }

    /// Ensures every group along `segments` except the last exists,
    /// creating intermediate groups as needed (the same "mkdir -p" shape
    /// `h5py.Group.create_group` uses for nested names).
    ///
    /// Returns the parent group and the final segment name, or a
    /// [`StorageError::TypeError`] if an intermediate component names an
    /// existing dataset.
    fn ensure_parent<'a>(
        &'a mut self,
        segments: &[&str],
    ) -> Result<(&'a mut TreeNode, &'a str), StorageError> {
        let (last, parents) = segments.split_last().ok_or_else(|| {
            StorageError::InvalidPath("path must name a node, not the root".to_owned())
        })?;

        let mut node = &mut self.container.root;
        for seg in parents {
            let has_child = node.child(seg).is_some();
            if !has_child {
                if let TreeNode::Group { children, .. } = node {
                    children.push(((*seg).to_owned(), TreeNode::new_group()));
                }
            }
            let child = node
                .child_mut(seg)
                .expect("just ensured this child exists");
            if !matches!(child, TreeNode::Group { .. }) {
                return Err(StorageError::TypeError(format!(
                    "path component {seg:?} is a dataset, not a group"
                )));
            }
            node = child;
        }
        Ok((node, last))
    }

    /// `contains` — whether any node exists at `path`.
    pub fn contains(&self, path: &str) -> Result<bool, StorageError> {
        let segments = split_path(path)?;
        Ok(self.navigate(&segments).is_some())
    }

    /// `create_group` — create a new group, auto-creating intermediate
    /// groups. Conflicts (any existing node at the final path) are
    /// reported as [`StorageError::GroupExists`], matching the original
    /// protocol's unconditional `path in db` check.
    pub fn create_group(&mut self, path: &str) -> Result<(), StorageError> {
        let segments = split_path(path)?;
        if segments.is_empty() {
            return Err(StorageError::GroupExists);
        }
        let (parent, name) = self.ensure_parent(&segments)?;
        if parent.child(name).is_some() {
            return Err(StorageError::GroupExists);
        }
        if let TreeNode::Group { children, .. } = parent {
            children.push((name.to_owned(), TreeNode::new_group()));
        }
        Ok(())
    }

    /// `require_group` — like `create_group`, but idempotent: an
    /// existing group at the final path succeeds silently, and only an
    /// existing dataset there is an error.
    pub fn require_group(&mut self, path: &str) -> Result<(), StorageError> {
        let segments = split_path(path)?;
        if segments.is_empty() {
            return Ok(());
        }
        let (parent, name) = self.ensure_parent(&segments)?;
        match parent.child(name) {
            Some(TreeNode::Group { .. }) => Ok(()),
            Some(TreeNode::Dataset { .. }) => Err(StorageError::TypeError(format!(
                "{path} is a dataset, not a group"
            ))),
            None => {
                if let TreeNode::Group { children, .. } = parent {
                    children.push((name.to_owned(), TreeNode::new_group()));
                }
                Ok(())
            }
        }
    }

    /// `create_dataset` — create a dataset from `array`. If `overwrite`
    /// is false and a node already exists at `path`, returns
    /// [`StorageError::DatasetExists`].
    pub fn create_dataset(
        &mut self,
        path: &str,
        array: &ArrayValue,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let segments = split_path(path)?;
        if segments.is_empty() {
            return Err(StorageError::DatasetExists);
        }
        let (parent, name) = self.ensure_parent(&segments)?;
        let exists = parent.child(name).is_some();
        if exists && !overwrite {
            return Err(StorageError::DatasetExists);
        }
        let node = TreeNode::Dataset {
            attrs: Vec::new(),
            array: StoredArray::from(array),
        };
        if let TreeNode::Group { children, .. } = parent {
            if let Some(slot) = children.iter_mut().find(|(k, _)| k == name) {
                slot.1 = node;
            } else {
                children.push((name.to_owned(), node));
            }
        }
        Ok(())
    }

    /// `require_dataset` — an existing dataset at `path` succeeds only
    /// if its dtype and shape match; a mismatch is
    /// [`StorageError::IncompatibleData`] (SPEC_FULL.md, Open Questions).
    /// A missing node creates a zero-filled dataset of the requested
    /// shape/dtype.
    pub fn require_dataset(
        &mut self,
        path: &str,
        dtype: DType,
        shape: &[u64],
    ) -> Result<(), StorageError> {
        let segments = split_path(path)?;
        if segments.is_empty() {
            return Err(StorageError::TypeError("root is a group, not a dataset".to_owned()));
        }
        let (parent, name) = self.ensure_parent(&segments)?;
        match parent.child(name) {
            Some(TreeNode::Dataset { array, .. }) => {
                if array.dtype == dtype.as_str() && array.shape == shape {
                    Ok(())
                } else {
                    Err(StorageError::IncompatibleData(format!(
                        "existing dataset at {path} has dtype={} shape={:?}",
                        array.dtype, array.shape
                    )))
                }
            }
            Some(TreeNode::Group { .. }) => Err(StorageError::TypeError(format!(
                "{path} is a group, not a dataset"
            ))),
            None => {
                let item_count: u64 = shape.iter().product();
                let bytes = vec![0u8; (item_count as usize) * dtype.item_size()];
                let node = TreeNode::Dataset {
                    attrs: Vec::new(),
                    array: StoredArray {
                        dtype: dtype.as_str().to_owned(),
                        shape: shape.to_vec(),
                        fortran_order: false,
                        bytes,
                    },
                };
                if let TreeNode::Group { children, .. } = parent {
                    children.push((name.to_owned(), node));
                }
                Ok(())
            }
        }
    }

    /// `delete_node` — removes the group subtree or dataset at `path`.
    pub fn delete_node(&mut self, path: &str) -> Result<(), StorageError> {
        let segments = split_path(path)?;
        let (last, parents) = segments.split_last().ok_or_else(|| {
            StorageError::ValueError("cannot delete the root group".to_owned())
        })?;
        let parent = {
            let mut node = &mut self.container.root;
            for seg in parents {
                node = node
                    .child_mut(seg)
                    .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
            }
            node
        };
        if let TreeNode::Group { children, .. } = parent {
            let before = children.len();
            children.retain(|(k, _)| k != last);
            if children.len() == before {
                return Err(StorageError::NodeNotFound(path.to_owned()));
            }
            Ok(())
        } else {
            Err(StorageError::NodeNotFound(path.to_owned()))
        }
    }

    /// `get_node` — describes the node at `path`.
    pub fn get_node(&self, path: &str) -> Result<NodeDescriptor, StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        Ok(match node {
            TreeNode::Group { .. } => NodeDescriptor {
                kind: NodeKind::Group,
                path: path.to_owned(),
                shape: None,
                dtype: None,
            },
            TreeNode::Dataset { array, .. } => NodeDescriptor {
                kind: NodeKind::Dataset,
                path: path.to_owned(),
                shape: Some(array.shape.clone()),
                dtype: DType::parse(&array.dtype),
            },
        })
    }

    /// `get_keys` — immediate child names of the group at `path`, in
    /// insertion order.
    pub fn get_keys(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        match node {
            TreeNode::Group { children, .. } => {
                Ok(children.iter().map(|(k, _)| k.clone()).collect())
            }
            TreeNode::Dataset { .. } => {
                Err(StorageError::TypeError(format!("{path} is a dataset, not a group")))
            }
        }
    }

    /// `get_tree` — a recursive description of the node at `path` and
    /// all of its descendants, as nested tuples of
    /// `(node descriptor, children)`. Like `get_keys`, the target itself
    /// must be a group; a dataset has no children to enumerate.
    pub fn get_tree(&self, path: &str) -> Result<Value, StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        if matches!(node, TreeNode::Dataset { .. }) {
            return Err(StorageError::TypeError(format!("{path} is a dataset, not a group")));
        }
        Ok(Self::build_tree_value(path, node))
    }

    fn build_tree_value(path: &str, node: &TreeNode) -> Value {
        let descriptor = match node {
            TreeNode::Group { .. } => NodeDescriptor {
                kind: NodeKind::Group,
                path: path.to_owned(),
                shape: None,
                dtype: None,
            },
            TreeNode::Dataset { array, .. } => NodeDescriptor {
                kind: NodeKind::Dataset,
                path: path.to_owned(),
                shape: Some(array.shape.clone()),
                dtype: DType::parse(&array.dtype),
            },
        };
        let children = match node {
            TreeNode::Group { children, .. } => children
                .iter()
                .map(|(name, child)| {
                    let child_path = if path == "/" {
                        format!("/{name}")
                    } else {
                        format!("{path}/{name}")
                    };
                    Self::build_tree_value(&child_path, child)
                })
                .collect(),
            TreeNode::Dataset { .. } => Vec::new(),
        };
        Value::Tuple(vec![Value::Node(descriptor), Value::Tuple(children)])
    }

    /// `slice_dataset` — reads a sub-range along axis 0 of the dataset
    /// at `path`.
    ///
    /// Only axis-0 slicing is supported; this server does not implement
    /// the original backend's full N-dimensional fancy indexing.
    pub fn slice_dataset(&self, path: &str, slice: &SliceValue) -> Result<ArrayValue, StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        let TreeNode::Dataset { array, .. } = node else {
            return Err(StorageError::TypeError(format!("{path} is a group, not a dataset")));
        };
        let dtype = DType::parse(&array.dtype)
            .ok_or_else(|| StorageError::ValueError(format!("unsupported stored dtype {}", array.dtype)))?;
        let axis0 = *array.shape.first().unwrap_or(&0);
        let (start, end, step) = resolve_slice(slice, axis0)?;

        let row_len = dtype.item_size() * row_stride(&array.shape);
        let mut out_bytes = Vec::new();
        let mut out_rows: u64 = 0;
        let mut i = start;
        while (step > 0 && i < end) || (step < 0 && i > end) {
            let offset = (i as usize) * row_len;
            out_bytes.extend_from_slice(&array.bytes[offset..offset + row_len]);
            out_rows += 1;
            i += step;
        }

        let mut shape = array.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first = out_rows;
        }
        Ok(ArrayValue {
            dtype,
            shape,
            fortran_order: array.fortran_order,
            bytes: out_bytes,
        })
    }

    /// `broadcast_dataset` — writes `data` into the sub-range along
    /// axis 0 named by `slice` of the dataset at `path`.
    pub fn broadcast_dataset(
        &mut self,
        path: &str,
        slice: &SliceValue,
        data: &ArrayValue,
    ) -> Result<(), StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate_mut(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        let TreeNode::Dataset { array, .. } = node else {
            return Err(StorageError::TypeError(format!("{path} is a group, not a dataset")));
        };
        if array.dtype != data.dtype.as_str() {
            return Err(StorageError::TypeError(format!(
                "cannot broadcast {} into a dataset of dtype {}",
                data.dtype.as_str(),
                array.dtype
            )));
        }
        let axis0 = *array.shape.first().unwrap_or(&0);
        let (start, end, step) = resolve_slice(slice, axis0)?;
        if step != 1 {
            return Err(StorageError::ValueError(
                "broadcast_dataset only supports a contiguous (step=1) slice".to_owned(),
            ));
        }
        let target_rows = end.saturating_sub(start);
        let data_rows = *data.shape.first().unwrap_or(&0);
        if target_rows != data_rows {
            return Err(StorageError::ValueError(format!(
                "slice selects {target_rows} rows but data has {data_rows}"
            )));
        }

        let row_len = data.dtype.item_size() * row_stride(&data.shape);
        if data.bytes.len() as u64 != data_rows * row_len as u64 {
            return Err(StorageError::ValueError(
                "data byte length does not match its declared shape".to_owned(),
            ));
        }
        let start_offset = (start as usize) * row_len;
        array.bytes[start_offset..start_offset + data.bytes.len()].copy_from_slice(&data.bytes);
        Ok(())
    }

    /// `broadcast_dataset` with a scalar right-hand side — fills the
    /// sub-range named by `slice` with one repeated value, matching the
    /// dataset's own dtype (SPEC_FULL.md §6, `broadcast_dataset` "array or
    /// scalar"). Rejects a scalar of the wrong kind for the dataset's
    /// dtype as [`StorageError::TypeError`].
    pub fn broadcast_scalar(
        &mut self,
        path: &str,
        slice: &SliceValue,
        value: &Value,
    ) -> Result<(), StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate_mut(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        let TreeNode::Dataset { array, .. } = node else {
            return Err(StorageError::TypeError(format!("{path} is a group, not a dataset")));
        };
        let dtype = DType::parse(&array.dtype)
            .ok_or_else(|| StorageError::ValueError(format!("unsupported stored dtype {}", array.dtype)))?;
        let element = encode_scalar(value, dtype)?;

        let axis0 = *array.shape.first().unwrap_or(&0);
        let (start, end, step) = resolve_slice(slice, axis0)?;
        if step != 1 {
            return Err(StorageError::ValueError(
                "broadcast_dataset only supports a contiguous (step=1) slice".to_owned(),
            ));
        }
        let rows = end.saturating_sub(start).max(0) as u64;
        let row_elems = row_stride(&array.shape) as u64;
        let row_len = dtype.item_size() * row_stride(&array.shape);

        let mut out = Vec::with_capacity(row_len * rows as usize);
        for _ in 0..(rows * row_elems) {
            out.extend_from_slice(&element);
        }
        let start_offset = (start as usize) * row_len;
        array.bytes[start_offset..start_offset + out.len()].copy_from_slice(&out);
        Ok(())
    }

    /// `attrs_get` — the value of attribute `key` on the node at `path`.
    pub fn attrs_get(&self, path: &str, key: &str) -> Result<Value, StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        node.attrs()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| from_stored(v))
            .ok_or_else(|| StorageError::KeyError(key.to_owned()))
    }

    /// `attrs_set` — sets attribute `key` to `value` on the node at
    /// `path`, overwriting any existing value.
    pub fn attrs_set(&mut self, path: &str, key: &str, value: &Value) -> Result<(), StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate_mut(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        let stored = to_stored(value)
            .ok_or_else(|| StorageError::ValueError("value cannot be stored as an attribute".to_owned()))?;
        let attrs = node.attrs_mut();
        if let Some(slot) = attrs.iter_mut().find(|(k, _)| k == key) {
            slot.1 = stored;
        } else {
            attrs.push((key.to_owned(), stored));
        }
        Ok(())
    }

    /// `attrs_contains` — whether attribute `key` is set on the node at
    /// `path`.
    pub fn attrs_contains(&self, path: &str, key: &str) -> Result<bool, StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        Ok(node.attrs().iter().any(|(k, _)| k == key))
    }

    /// `attrs_keys` — every attribute name set on the node at `path`, in
    /// insertion order (not a contractual ordering guarantee).
    pub fn attrs_keys(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        Ok(node.attrs().iter().map(|(k, _)| k.clone()).collect())
    }

    /// `attrs_del` — removes attribute `key` from the node at `path`.
    pub fn attrs_del(&mut self, path: &str, key: &str) -> Result<(), StorageError> {
        let segments = split_path(path)?;
        let node = self
            .navigate_mut(&segments)
            .ok_or_else(|| StorageError::NodeNotFound(path.to_owned()))?;
        let attrs = node.attrs_mut();
        let before = attrs.len();
        attrs.retain(|(k, _)| k != key);
        if attrs.len() == before {
            return Err(StorageError::KeyError(key.to_owned()));
        }
        Ok(())
    }
}

/// Number of elements per row (product of every dimension after axis 0).
fn row_stride(shape: &[u64]) -> usize {
    shape.iter().skip(1).product::<u64>() as usize
}

/// Packs a single scalar [`Value`] into `dtype`'s little-endian on-disk
/// representation, for `broadcast_scalar`.
fn encode_scalar(value: &Value, dtype: DType) -> Result<Vec<u8>, StorageError> {
    let mismatch = || {
        StorageError::TypeError(format!("cannot broadcast {value:?} into a dataset of dtype {}", dtype.as_str()))
    };
    match (value, dtype) {
        (Value::Bool(b), DType::Bool) => Ok(vec![u8::from(*b)]),
        (Value::Int(n), DType::Int8) => Ok((*n as i8).to_le_bytes().to_vec()),
        (Value::Int(n), DType::Int16) => Ok((*n as i16).to_le_bytes().to_vec()),
        (Value::Int(n), DType::Int32) => Ok((*n as i32).to_le_bytes().to_vec()),
        (Value::Int(n), DType::Int64) => Ok(n.to_le_bytes().to_vec()),
        (Value::Int(n), DType::UInt8) => Ok((*n as u8).to_le_bytes().to_vec()),
        (Value::Int(n), DType::UInt16) => Ok((*n as u16).to_le_bytes().to_vec()),
        (Value::Int(n), DType::UInt32) => Ok((*n as u32).to_le_bytes().to_vec()),
        (Value::Int(n), DType::UInt64) => Ok((*n as u64).to_le_bytes().to_vec()),
        (Value::Float(f), DType::Float32) => Ok((*f as f32).to_le_bytes().to_vec()),
        (Value::Float(f), DType::Float64) => Ok(f.to_le_bytes().to_vec()),
        _ => Err(mismatch()),
    }
}

/// Resolves a [`SliceValue`] against an axis of length `len` into a
/// concrete `(start, stop, step)` triple, Python-slice style (negative
/// and out-of-range bounds are clamped rather than rejected; a zero step
/// is the one value that is always an error).
fn resolve_slice(slice: &SliceValue, len: u64) -> Result<(i64, i64, i64), StorageError> {
    let step = slice.step.unwrap_or(1);
    if step == 0 {
        return Err(StorageError::ValueError("slice step cannot be zero".to_owned()));
    }
    let len = len as i64;
    let clamp = |n: i64| -> i64 {
        let n = if n < 0 { (n + len).max(0) } else { n };
        n.min(len)
    };
    let (default_start, default_stop) = if step > 0 { (0, len) } else { (len - 1, -1) };
    let start = slice.start.map_or(default_start, clamp);
    let stop = slice.stop.map_or(default_stop, clamp);
    Ok((start, stop, step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_array(rows: u64) -> ArrayValue {
        ArrayValue {
            dtype: DType::Int64,
            shape: vec![rows],
            fortran_order: false,
            bytes: (0..rows).flat_map(|i| i.to_le_bytes()).collect(),
        }
    }

    #[test]
    fn create_open_and_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();
        tree.create_group("/station1").unwrap();
        tree.save().unwrap();

        let reopened = NodeTree::open(&path).unwrap();
        assert!(reopened.contains("/station1").unwrap());
    }

    #[test]
    fn create_group_auto_creates_intermediates_and_rejects_conflicts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();

        tree.create_group("/a/b/c").unwrap();
        assert!(tree.contains("/a").unwrap());
        assert!(tree.contains("/a/b").unwrap());
        assert!(tree.contains("/a/b/c").unwrap());

        let err = tree.create_group("/a/b/c").unwrap_err();
        assert!(matches!(err, StorageError::GroupExists));
    }

    #[test]
    fn require_group_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();

        tree.require_group("/a").unwrap();
        tree.require_group("/a").unwrap();
        assert!(tree.contains("/a").unwrap());
    }

    #[test]
    fn create_dataset_then_get_node_reports_shape_and_dtype() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();

        let arr = sample_array(4);
        tree.create_dataset("/readings", &arr, false).unwrap();

        let err = tree.create_dataset("/readings", &arr, false).unwrap_err();
        assert!(matches!(err, StorageError::DatasetExists));

        let node = tree.get_node("/readings").unwrap();
        assert_eq!(node.kind, NodeKind::Dataset);
        assert_eq!(node.shape, Some(vec![4]));
        assert_eq!(node.dtype, Some(DType::Int64));
    }

    #[test]
    fn require_dataset_matching_descriptor_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();

        tree.require_dataset("/readings", DType::Int64, &[4]).unwrap();
        tree.require_dataset("/readings", DType::Int64, &[4]).unwrap();
    }

    #[test]
    fn require_dataset_mismatch_is_incompatible_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();

        tree.require_dataset("/readings", DType::Int64, &[4]).unwrap();
        let err = tree.require_dataset("/readings", DType::Int64, &[5]).unwrap_err();
        assert!(matches!(err, StorageError::IncompatibleData(_)));
    }

    #[test]
    fn delete_node_removes_subtree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();

        tree.create_group("/a/b").unwrap();
        tree.delete_node("/a").unwrap();
        assert!(!tree.contains("/a").unwrap());

        let err = tree.delete_node("/a").unwrap_err();
        assert!(matches!(err, StorageError::NodeNotFound(_)));
    }

    #[test]
    fn slice_dataset_reads_a_subrange() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();

        tree.create_dataset("/readings", &sample_array(10), false).unwrap();
        let slice = SliceValue {
            start: Some(2),
            stop: Some(5),
            step: None,
        };
        let out = tree.slice_dataset("/readings", &slice).unwrap();
        assert_eq!(out.shape, vec![3]);
        let values: Vec<i64> = out
            .bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![2, 3, 4]);
    }

    #[test]
    fn broadcast_dataset_overwrites_a_subrange() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();

        tree.create_dataset("/readings", &sample_array(5), false).unwrap();
        let replacement = ArrayValue {
            dtype: DType::Int64,
            shape: vec![2],
            fortran_order: false,
            bytes: vec![99i64, 98i64].into_iter().flat_map(i64::to_le_bytes).collect(),
        };
        let slice = SliceValue {
            start: Some(1),
            stop: Some(3),
            step: None,
        };
        tree.broadcast_dataset("/readings", &slice, &replacement).unwrap();

        let out = tree
            .slice_dataset(
                "/readings",
                &SliceValue {
                    start: None,
                    stop: None,
                    step: None,
                },
            )
            .unwrap();
        let values: Vec<i64> = out
            .bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![0, 99, 98, 3, 4]);
    }

    #[test]
    fn broadcast_dataset_rejects_dtype_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();
        tree.create_dataset("/readings", &sample_array(4), false).unwrap();

        let bad = ArrayValue {
            dtype: DType::Float32,
            shape: vec![1],
            fortran_order: false,
            bytes: vec![0; 4],
        };
        let err = tree
            .broadcast_dataset(
                "/readings",
                &SliceValue {
                    start: Some(0),
                    stop: Some(1),
                    step: None,
                },
                &bad,
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::TypeError(_)));
    }

    #[test]
    fn broadcast_scalar_fills_a_subrange() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();
        tree.create_dataset("/readings", &sample_array(5), false).unwrap();

        let slice = SliceValue {
            start: Some(1),
            stop: Some(4),
            step: None,
        };
        tree.broadcast_scalar("/readings", &slice, &Value::Int(7)).unwrap();

        let out = tree
            .slice_dataset("/readings", &SliceValue { start: None, stop: None, step: None })
            .unwrap();
        let values: Vec<i64> = out
            .bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![0, 7, 7, 7, 4]);
    }

    #[test]
    fn broadcast_scalar_rejects_the_wrong_kind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();
        tree.create_dataset("/readings", &sample_array(3), false).unwrap();

        let slice = SliceValue { start: Some(0), stop: Some(1), step: None };
        let err = tree
            .broadcast_scalar("/readings", &slice, &Value::Str("nope".to_owned()))
            .unwrap_err();
        assert!(matches!(err, StorageError::TypeError(_)));
    }

    #[test]
    fn attribute_lifecycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();
        tree.create_group("/a").unwrap();

        assert!(!tree.attrs_contains("/a", "unit").unwrap());
        tree.attrs_set("/a", "unit", &Value::Str("celsius".to_owned())).unwrap();
        assert!(tree.attrs_contains("/a", "unit").unwrap());
        assert_eq!(
            tree.attrs_get("/a", "unit").unwrap(),
            Value::Str("celsius".to_owned())
        );
        assert_eq!(tree.attrs_keys("/a").unwrap(), vec!["unit".to_owned()]);

        tree.attrs_del("/a", "unit").unwrap();
        let err = tree.attrs_get("/a", "unit").unwrap_err();
        assert!(matches!(err, StorageError::KeyError(_)));

        let err = tree.attrs_del("/a", "unit").unwrap_err();
        assert!(matches!(err, StorageError::KeyError(_)));
    }

    #[test]
    fn get_tree_is_recursive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vault");
        NodeTree::create(&path).unwrap();
        let mut tree = NodeTree::open(&path).unwrap();
        tree.create_group("/a").unwrap();
        tree.create_dataset("/a/readings", &sample_array(2), false).unwrap();

        let value = tree.get_tree("/").unwrap();
        let Value::Tuple(top) = value else { panic!("expected tuple") };
        let Value::Tuple(children) = &top[1] else { panic!("expected children tuple") };
        assert_eq!(children.len(), 1);
    }
}
