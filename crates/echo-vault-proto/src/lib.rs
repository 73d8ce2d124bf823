// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Payload codec and command schema for the vault wire protocol.
//!
//! This crate owns everything that lives *inside* a frame body (see
//! `echo-vault-wire` for the envelope around it): the self-describing
//! [`Value`] model, the array/slice/node extensions, dtype codes, status
//! codes, and the [`Request`]/[`Response`] envelopes the dispatcher
//! speaks.

mod dtype;
mod message;
mod status;
mod value;

pub use dtype::DType;
pub use message::{Request, Response};
pub use status::Status;
pub use value::{ArrayValue, NodeDescriptor, NodeKind, ProtoError, SliceValue, Value};
