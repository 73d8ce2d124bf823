// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Path-escape validation (SPEC_FULL.md §4.5, §8 "Path safety"). Rejecting
//! `..` segments is the dispatcher's job, not `echo-vault-storage`'s — see
//! that crate's module doc.

use echo_vault_proto::Status;
use std::path::Path;

/// Validates a client-supplied database name: non-empty, relative, and
/// free of `..` segments that could resolve outside the base directory.
pub(crate) fn validate_db_name(db: &str) -> Result<(), Status> {
    if db.is_empty() {
        return Err(Status::InvalidArgument);
    }
    if Path::new(db).is_absolute() {
        return Err(Status::InvalidArgument);
    }
    if db.split('/').any(|segment| segment == ".." || segment.is_empty()) {
        return Err(Status::InvalidArgument);
    }
    Ok(())
}

/// Validates a client-supplied node path: merely non-empty here: the `/`
/// prefix and segment shape are `NodeTree`'s job (`StorageError::InvalidPath`
/// maps back to the same [`Status::InvalidArgument`] via
/// [`crate::error::map_storage_error`]).
pub(crate) fn validate_node_path(path: &str) -> Result<(), Status> {
    if path.is_empty() {
        return Err(Status::InvalidArgument);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_relative_names_are_fine() {
        assert!(validate_db_name("a.vault").is_ok());
        assert!(validate_db_name("sub/a.vault").is_ok());
    }

    #[test]
    fn empty_name_is_rejected() {
        assert_eq!(validate_db_name(""), Err(Status::InvalidArgument));
    }

    #[test]
    fn dot_dot_escape_is_rejected() {
        assert_eq!(validate_db_name("../escape.vault"), Err(Status::InvalidArgument));
        assert_eq!(validate_db_name("sub/../../escape.vault"), Err(Status::InvalidArgument));
    }

    #[test]
    fn absolute_name_is_rejected() {
        assert_eq!(validate_db_name("/etc/passwd"), Err(Status::InvalidArgument));
    }

    #[test]
    fn empty_path_is_rejected() {
        assert_eq!(validate_node_path(""), Err(Status::InvalidArgument));
    }
}
