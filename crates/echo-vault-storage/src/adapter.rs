// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! [`StorageAdapter`]: every operation the dispatcher needs, each wrapped
//! in the matching [`echo_vault_lock`] acquisition (SPEC_FULL.md §4.4).
//!
//! The lock identity is the client-supplied `db` name, not the resolved
//! absolute path or an open file handle — see SPEC_FULL.md §9,
//! "Locking granularity". Every method here acquires exactly one guard,
//! does its work, and releases it before returning; none call each other
//! across a lock boundary (SPEC_FULL.md §9, "Non-reentrancy").

use crate::error::StorageError;
use crate::tree::NodeTree;
use echo_vault_lock::{HolderId, LockService};
use echo_vault_proto::{ArrayValue, DType, NodeDescriptor, SliceValue, Value};
use std::path::{Path, PathBuf};

/// Ties a base directory of database files to the [`LockService`] guarding
/// them, and exposes exactly the operations `echo-vault-dispatch` needs.
pub struct StorageAdapter {
    base: PathBuf,
    locks: LockService,
}

impl StorageAdapter {
    /// Builds an adapter rooted at `base`, coordinating access through
    /// `locks`.
    #[must_use]
    pub fn new(base: PathBuf, locks: LockService) -> Self {
        Self { base, locks }
    }

    /// The base directory every database file is resolved against.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn db_path(&self, db: &str) -> PathBuf {
        self.base.join(db)
    }

    async fn with_read<T>(
        &self,
        db: &str,
        holder: HolderId,
        f: impl FnOnce(&NodeTree) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.locks.acquire_read(db, holder).await?;
        let result = NodeTree::open(&self.db_path(db)).and_then(|tree| f(&tree));
        guard.release().await;
        result
    }

    async fn with_write<T>(
        &self,
        db: &str,
        holder: HolderId,
        f: impl FnOnce(&mut NodeTree) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.locks.acquire_write(db, holder).await?;
        let result = (|| {
            let mut tree = NodeTree::open(&self.db_path(db))?;
            let out = f(&mut tree)?;
            tree.save()?;
            Ok(out)
        })();
        guard.release().await;
        result
    }

    // ---- file-level operations ----------------------------------------

    /// `create_db` — create (or, if `overwrite`, truncate-create) the
    /// database file named `db`.
    pub async fn create_db(
        &self,
        db: &str,
        overwrite: bool,
        holder: HolderId,
    ) -> Result<(), StorageError> {
        let guard = self.locks.acquire_write(db, holder).await?;
        let result = crate::create_db(&self.base, db, overwrite);
        guard.release().await;
        result
    }

    /// `delete_db` — remove the database file named `db`.
    pub async fn delete_db(&self, db: &str, holder: HolderId) -> Result<(), StorageError> {
        let guard = self.locks.acquire_write(db, holder).await?;
        let result = crate::delete_db(&self.base, db);
        guard.release().await;
        result
    }

    /// `rename_db` — move `db` to `new_name`, both relative to the base
    /// directory.
    pub async fn rename_db(
        &self,
        db: &str,
        new_name: &str,
        holder: HolderId,
    ) -> Result<(), StorageError> {
        let guard = self.locks.acquire_write(db, holder).await?;
        let result = crate::rename_db(&self.base, db, new_name);
        guard.release().await;
        result
    }

    /// `use_db`/existence checks — whether the database file named `db`
    /// is present.
    pub async fn db_exists(&self, db: &str, holder: HolderId) -> Result<bool, StorageError> {
        let guard = self.locks.acquire_read(db, holder).await?;
        let result = crate::db_exists(&self.base, db);
        guard.release().await;
        Ok(result)
    }

    /// `get_filesize` — byte size of the database file named `db`.
    pub async fn filesize(&self, db: &str, holder: HolderId) -> Result<u64, StorageError> {
        let guard = self.locks.acquire_read(db, holder).await?;
        let result = crate::filesize(&self.base, db);
        guard.release().await;
        result
    }

    /// `list_dbs` — relative names of every database file under the base
    /// directory. Not a per-file operation, so it takes no lock; a
    /// database created or deleted mid-scan may or may not appear,
    /// matching the best-effort contract in `echo_vault_storage::list_dbs`.
    #[must_use]
    pub fn list_dbs(&self) -> Vec<String> {
        crate::list_dbs(&self.base)
    }

    // ---- node-level operations ------------------------------------------

    /// `create_group`.
    pub async fn create_group(
        &self,
        db: &str,
        path: &str,
        holder: HolderId,
    ) -> Result<(), StorageError> {
        self.with_write(db, holder, |tree| tree.create_group(path)).await
    }

    /// `require_group`.
    pub async fn require_group(
        &self,
        db: &str,
        path: &str,
        holder: HolderId,
    ) -> Result<(), StorageError> {
        self.with_write(db, holder, |tree| tree.require_group(path)).await
    }

    /// `create_dataset`, returning the node descriptor of the dataset it
    /// created.
    pub async fn create_dataset(
        &self,
        db: &str,
        path: &str,
        array: &ArrayValue,
        overwrite: bool,
        holder: HolderId,
    ) -> Result<NodeDescriptor, StorageError> {
        self.with_write(db, holder, |tree| {
            tree.create_dataset(path, array, overwrite)?;
            tree.get_node(path)
        })
        .await
    }

    /// `require_dataset`, returning the node descriptor of the dataset
    /// whether it was just created or already matched.
    pub async fn require_dataset(
        &self,
        db: &str,
        path: &str,
        dtype: DType,
        shape: &[u64],
        holder: HolderId,
    ) -> Result<NodeDescriptor, StorageError> {
        self.with_write(db, holder, |tree| {
            tree.require_dataset(path, dtype, shape)?;
            tree.get_node(path)
        })
        .await
    }

    /// `get_node`.
    pub async fn get_node(
        &self,
        db: &str,
        path: &str,
        holder: HolderId,
    ) -> Result<NodeDescriptor, StorageError> {
        self.with_read(db, holder, |tree| tree.get_node(path)).await
    }

    /// `get_keys`.
    pub async fn get_keys(
        &self,
        db: &str,
        path: &str,
        holder: HolderId,
    ) -> Result<Vec<String>, StorageError> {
        self.with_read(db, holder, |tree| tree.get_keys(path)).await
    }

    /// `get_tree`.
    pub async fn get_tree(
        &self,
        db: &str,
        path: &str,
        holder: HolderId,
    ) -> Result<Value, StorageError> {
        self.with_read(db, holder, |tree| tree.get_tree(path)).await
    }

    /// `contains`.
    pub async fn contains(
        &self,
        db: &str,
        path: &str,
        holder: HolderId,
    ) -> Result<bool, StorageError> {
        self.with_read(db, holder, |tree| tree.contains(path)).await
    }

    /// `delete_node`.
    pub async fn delete_node(
        &self,
        db: &str,
        path: &str,
        holder: HolderId,
    ) -> Result<(), StorageError> {
        self.with_write(db, holder, |tree| tree.delete_node(path)).await
    }

    /// `slice_dataset`.
    pub async fn slice_dataset(
        &self,
        db: &str,
        path: &str,
        slice: &SliceValue,
        holder: HolderId,
    ) -> Result<ArrayValue, StorageError> {
        self.with_read(db, holder, |tree| tree.slice_dataset(path, slice)).await
    }

    /// `broadcast_dataset`.
    pub async fn broadcast_dataset(
        &self,
        db: &str,
        path: &str,
        slice: &SliceValue,
        data: &ArrayValue,
        holder: HolderId,
    ) -> Result<(), StorageError> {
        self.with_write(db, holder, |tree| tree.broadcast_dataset(path, slice, data))
            .await
    }

    /// `broadcast_dataset` with a scalar right-hand side.
    pub async fn broadcast_scalar(
        &self,
        db: &str,
        path: &str,
        slice: &SliceValue,
        value: &Value,
        holder: HolderId,
    ) -> Result<(), StorageError> {
        self.with_write(db, holder, |tree| tree.broadcast_scalar(path, slice, value))
            .await
    }

    /// `attrs_get`.
    pub async fn attrs_get(
        &self,
        db: &str,
        path: &str,
        key: &str,
        holder: HolderId,
    ) -> Result<Value, StorageError> {
        self.with_read(db, holder, |tree| tree.attrs_get(path, key)).await
    }

    /// `attrs_set`.
    pub async fn attrs_set(
        &self,
        db: &str,
        path: &str,
        key: &str,
        value: &Value,
        holder: HolderId,
    ) -> Result<(), StorageError> {
        self.with_write(db, holder, |tree| tree.attrs_set(path, key, value)).await
    }

    /// `attrs_contains`.
    pub async fn attrs_contains(
        &self,
        db: &str,
        path: &str,
        key: &str,
        holder: HolderId,
    ) -> Result<bool, StorageError> {
        self.with_read(db, holder, |tree| tree.attrs_contains(path, key)).await
    }

    /// `attrs_keys`.
    pub async fn attrs_keys(
        &self,
        db: &str,
        path: &str,
        holder: HolderId,
    ) -> Result<Vec<String>, StorageError> {
        self.with_read(db, holder, |tree| tree.attrs_keys(path)).await
    }

    /// `attrs_del`.
    pub async fn attrs_del(
        &self,
        db: &str,
        path: &str,
        key: &str,
        holder: HolderId,
    ) -> Result<(), StorageError> {
        self.with_write(db, holder, |tree| tree.attrs_del(path, key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_vault_lock::Strategy;
    use tempfile::tempdir;

    fn sample_array() -> ArrayValue {
        ArrayValue {
            dtype: DType::Int64,
            shape: vec![3],
            fortran_order: false,
            bytes: vec![0u8; 24],
        }
    }

    #[tokio::test]
    async fn create_and_delete_db_round_trip() {
        let dir = tempdir().unwrap();
        let adapter = StorageAdapter::new(dir.path().to_path_buf(), LockService::new(Strategy::WriterPreference));

        adapter.create_db("a.vault", false, 1).await.unwrap();
        assert!(adapter.db_exists("a.vault", 1).await.unwrap());

        let err = adapter.create_db("a.vault", false, 1).await.unwrap_err();
        assert!(matches!(err, StorageError::FileExists));

        adapter.delete_db("a.vault", 1).await.unwrap();
        assert!(!adapter.db_exists("a.vault", 1).await.unwrap());
    }

    #[tokio::test]
    async fn node_operations_persist_across_calls() {
        let dir = tempdir().unwrap();
        let adapter = StorageAdapter::new(dir.path().to_path_buf(), LockService::new(Strategy::WriterPreference));
        adapter.create_db("a.vault", false, 1).await.unwrap();

        adapter.create_group("a.vault", "/station1", 1).await.unwrap();
        assert!(adapter.contains("a.vault", "/station1", 1).await.unwrap());

        let node = adapter
            .create_dataset("a.vault", "/station1/readings", &sample_array(), false, 1)
            .await
            .unwrap();
        assert_eq!(node.path, "/station1/readings");

        adapter
            .attrs_set("a.vault", "/station1/readings", "unit", &Value::Str("celsius".to_owned()), 1)
            .await
            .unwrap();
        assert_eq!(
            adapter.attrs_get("a.vault", "/station1/readings", "unit", 1).await.unwrap(),
            Value::Str("celsius".to_owned())
        );
    }

    #[tokio::test]
    async fn concurrent_readers_on_distinct_holders_both_succeed() {
        let dir = tempdir().unwrap();
        let adapter = StorageAdapter::new(dir.path().to_path_buf(), LockService::new(Strategy::WriterPreference));
        adapter.create_db("a.vault", false, 1).await.unwrap();
        adapter.create_group("a.vault", "/a", 1).await.unwrap();

        let (a, b) = tokio::join!(
            adapter.contains("a.vault", "/a", 2),
            adapter.contains("a.vault", "/a", 3),
        );
        assert!(a.unwrap());
        assert!(b.unwrap());
    }
}
