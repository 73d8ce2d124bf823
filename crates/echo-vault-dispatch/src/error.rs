// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Maps [`StorageError`] onto the wire [`Status`] taxonomy (SPEC_FULL.md
//! §7). Variant names were chosen in `echo-vault-storage` to make this
//! mapping mechanical.

use echo_vault_proto::Status;
use echo_vault_storage::StorageError;

/// Translates a storage-layer failure into the status code a client sees.
#[must_use]
pub fn map_storage_error(err: &StorageError) -> Status {
    match err {
        StorageError::Io(_) | StorageError::Corrupt(_) | StorageError::Lock(_) => {
            Status::InternalServerError
        }
        StorageError::FileExists => Status::FileExists,
        StorageError::FileNotFound => Status::FileNotFound,
        StorageError::GroupExists => Status::GroupExists,
        StorageError::DatasetExists => Status::DatasetExists,
        StorageError::NodeNotFound(_) => Status::NodeNotFound,
        StorageError::ValueError(_) => Status::ValueError,
        StorageError::TypeError(_) => Status::TypeError,
        StorageError::KeyError(_) => Status::KeyError,
        StorageError::IncompatibleData(_) => Status::IncompatibleData,
        StorageError::InvalidPath(_) => Status::InvalidArgument,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_failures_are_internal_server_errors() {
        let err = StorageError::Io(std::io::Error::other("boom"));
        assert_eq!(map_storage_error(&err), Status::InternalServerError);
    }

    #[test]
    fn dataset_exists_maps_straight_across() {
        assert_eq!(map_storage_error(&StorageError::DatasetExists), Status::DatasetExists);
    }

    #[test]
    fn invalid_path_is_a_client_error_not_a_storage_one() {
        assert_eq!(
            map_storage_error(&StorageError::InvalidPath("no leading slash".to_owned())),
            Status::InvalidArgument
        );
    }
}
