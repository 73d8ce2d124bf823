// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The on-disk hierarchical array container backing `vaultd`.
//!
//! This crate has two layers. File-level operations (`create_db`,
//! `delete_db`, `rename_db`, `list_dbs`, `filesize`, `db_exists`) work on
//! whole database files under a base directory and never need one
//! loaded into memory. Node-level operations (everything from
//! `create_group` down) need a database open, via [`tree::NodeTree`].
//! Path-escape validation (rejecting `..` segments that would reach
//! outside the base directory) is the dispatcher's job, not this
//! crate's — see `echo-vault-dispatch`. [`adapter::StorageAdapter`] ties
//! both layers to an `echo_vault_lock::LockService`, acquiring the
//! matching read/write guard around every call.

pub mod adapter;
pub mod error;
pub mod stored_value;
pub mod tree;

pub use adapter::StorageAdapter;
pub use error::StorageError;
pub use stored_value::{from_stored, to_stored, StoredArray, StoredValue};
pub use tree::NodeTree;

use std::path::{Path, PathBuf};

/// Resolves `db`, a client-supplied relative database name, against
/// `base`. Does not check for `..` escapes; the dispatcher validates
/// that before this crate ever sees the path.
fn resolve(base: &Path, db: &str) -> PathBuf {
    base.join(db)
}

/// `create_db` — creates a new, empty database file at `base/db`.
///
/// # Errors
/// Returns [`StorageError::FileExists`] if the file exists and
/// `overwrite` is false.
pub fn create_db(base: &Path, db: &str, overwrite: bool) -> Result<(), StorageError> {
    let path = resolve(base, db);
    if path.exists() {
        if !overwrite {
            return Err(StorageError::FileExists);
        }
        std::fs::remove_file(&path)?;
    }
    tracing::debug!(db, overwrite, "creating database");
    NodeTree::create(&path)
}

/// `delete_db` — removes the database file at `base/db`.
///
/// # Errors
/// Returns [`StorageError::FileNotFound`] if no file is there.
pub fn delete_db(base: &Path, db: &str) -> Result<(), StorageError> {
    let path = resolve(base, db);
    if !path.is_file() {
        return Err(StorageError::FileNotFound);
    }
    tracing::debug!(db, "deleting database");
    std::fs::remove_file(&path)?;
    Ok(())
}

/// `rename_db` — moves `base/db` to `base/db_new_name`.
///
/// # Errors
/// Returns [`StorageError::FileNotFound`] if `db` does not exist, or
/// [`StorageError::FileExists`] if `db_new_name` already does.
pub fn rename_db(base: &Path, db: &str, db_new_name: &str) -> Result<(), StorageError> {
    let from = resolve(base, db);
    let to = resolve(base, db_new_name);
    if !from.is_file() {
        return Err(StorageError::FileNotFound);
    }
    if to.exists() {
        return Err(StorageError::FileExists);
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::debug!(db, db_new_name, "renaming database");
    std::fs::rename(&from, &to)?;
    Ok(())
}

/// `db_exists` — whether a database file is present at `base/db`.
#[must_use]
pub fn db_exists(base: &Path, db: &str) -> bool {
    resolve(base, db).is_file()
}

/// `get_filesize` — size in bytes of the database file at `base/db`.
///
/// # Errors
/// Returns [`StorageError::FileNotFound`] if no file is there.
pub fn filesize(base: &Path, db: &str) -> Result<u64, StorageError> {
    NodeTree::filesize(&resolve(base, db))
}

/// `list_dbs` — relative names (including subdirectory components) of
/// every database file found recursively under `base`. Never fails: an
/// unreadable subdirectory is skipped rather than propagated, since this
/// command's contract (SPEC_FULL.md §4.5) is best-effort enumeration,
/// not a guarantee the base directory is healthy.
#[must_use]
pub fn list_dbs(base: &Path) -> Vec<String> {
    let mut out = Vec::new();
    walk(base, base, &mut out);
    out.sort();
    out
}

fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(base, &path, out);
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(base) {
                if let Some(name) = rel.to_str() {
                    out.push(name.to_owned());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_delete_and_exists_round_trip() {
        let dir = tempdir().unwrap();
        assert!(!db_exists(dir.path(), "a.h5"));

        create_db(dir.path(), "a.h5", false).unwrap();
        assert!(db_exists(dir.path(), "a.h5"));

        let err = create_db(dir.path(), "a.h5", false).unwrap_err();
        assert!(matches!(err, StorageError::FileExists));

        create_db(dir.path(), "a.h5", true).unwrap();

        delete_db(dir.path(), "a.h5").unwrap();
        assert!(!db_exists(dir.path(), "a.h5"));

        let err = delete_db(dir.path(), "a.h5").unwrap_err();
        assert!(matches!(err, StorageError::FileNotFound));
    }

    #[test]
    fn rename_db_moves_the_file() {
        let dir = tempdir().unwrap();
        create_db(dir.path(), "a.h5", false).unwrap();

        rename_db(dir.path(), "a.h5", "b.h5").unwrap();
        assert!(!db_exists(dir.path(), "a.h5"));
        assert!(db_exists(dir.path(), "b.h5"));

        let err = rename_db(dir.path(), "a.h5", "c.h5").unwrap_err();
        assert!(matches!(err, StorageError::FileNotFound));
    }

    #[test]
    fn list_dbs_is_recursive_and_sorted() {
        let dir = tempdir().unwrap();
        create_db(dir.path(), "b.h5", false).unwrap();
        create_db(dir.path(), "sub/a.h5", false).unwrap();

        let names = list_dbs(dir.path());
        assert_eq!(names, vec!["b.h5".to_owned(), "sub/a.h5".to_owned()]);
    }

    #[test]
    fn list_dbs_on_missing_base_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_dbs(&missing).is_empty());
    }

    #[test]
    fn filesize_reports_the_file_on_disk() {
        let dir = tempdir().unwrap();
        create_db(dir.path(), "a.h5", false).unwrap();
        let mut tree = NodeTree::open(&dir.path().join("a.h5")).unwrap();
        tree.create_group("/a").unwrap();
        tree.save().unwrap();

        let size = filesize(dir.path(), "a.h5").unwrap();
        assert!(size > 0);
    }
}
