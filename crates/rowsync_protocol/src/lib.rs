//! # RowSync Protocol
//!
//! Wire types for the RowSync pull/push protocol.
//!
//! This crate provides:
//! - [`PullRequest`] / [`PullResponse`] with [`PatchOperation`]s
//! - [`PushRequest`] / [`PushResponse`] with [`Mutation`]s
//! - Structured protocol errors ([`ErrorResponse`]) that travel as normal
//!   response bodies rather than transport failures
//! - Request validation ([`ProtocolError`])
//!
//! Messages are JSON and wire-compatible with row-version based sync
//! clients. This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod patch;

pub use error::{parse_uuid, ProtocolError, ProtocolResult};
pub use messages::{
    ErrorResponse, Mutation, PullOk, PullRequest, PullResponse, PushRequest, PushResponse,
    VersionType, PULL_VERSION, PUSH_VERSION,
};
pub use patch::{Cookie, PatchOperation};
