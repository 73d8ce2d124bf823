// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Numeric status codes returned in every response.
//!
//! The numbering is part of the wire contract (clients match on the
//! integer, not the variant name) and must never be renumbered.

/// Outcome of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    /// Command succeeded; no node was created or changed in a way that
    /// warrants [`Status::Created`]/[`Status::Updated`].
    Ok = 100,
    /// Command succeeded and created a new node or database.
    Created = 101,
    /// Command succeeded and updated an existing node's contents.
    Updated = 102,
    /// The `command` field named a command this server does not implement.
    UnknownCommand = 200,
    /// A required argument was absent from the request.
    MissingArgument = 201,
    /// An argument was present but had an invalid value or type.
    InvalidArgument = 202,
    /// A command requiring a `data` payload received none.
    MissingData = 203,
    /// The `data` payload could not be reconciled with an existing node.
    IncompatibleData = 204,
    /// `create_db` named a database file that already exists.
    FileExists = 300,
    /// The named database file does not exist.
    FileNotFound = 301,
    /// `create_group`/`require_group` found an incompatible group already there.
    GroupExists = 400,
    /// `create_dataset` found a dataset already at that path.
    DatasetExists = 401,
    /// The referenced group/dataset/attribute does not exist.
    NodeNotFound = 402,
    /// An argument value was syntactically valid but semantically wrong
    /// (e.g. a slice could not be applied to a dataset's shape).
    ValueError = 403,
    /// An operation was attempted against a node of the wrong kind
    /// (e.g. treating a group as a dataset).
    TypeError = 404,
    /// An attribute lookup used a key that is not present.
    KeyError = 405,
    /// The server failed for a reason not attributable to the request.
    InternalServerError = 500,
    /// The command is recognized but not implemented in this build.
    NotImplemented = 501,
}

impl Status {
    /// The numeric code sent on the wire.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Recovers a [`Status`] from its numeric code, if it is one we know.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            100 => Self::Ok,
            101 => Self::Created,
            102 => Self::Updated,
            200 => Self::UnknownCommand,
            201 => Self::MissingArgument,
            202 => Self::InvalidArgument,
            203 => Self::MissingData,
            204 => Self::IncompatibleData,
            300 => Self::FileExists,
            301 => Self::FileNotFound,
            400 => Self::GroupExists,
            401 => Self::DatasetExists,
            402 => Self::NodeNotFound,
            403 => Self::ValueError,
            404 => Self::TypeError,
            405 => Self::KeyError,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            _ => return None,
        })
    }

    /// Whether this status represents a successful command.
    #[must_use]
    pub const fn is_success(self) -> bool {
        (self.code()) < 200
    }
}
