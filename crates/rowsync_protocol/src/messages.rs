//! Protocol messages for pull and push.

use crate::error::{parse_uuid, ProtocolError, ProtocolResult};
use crate::patch::{Cookie, PatchOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The only supported pull protocol version.
pub const PULL_VERSION: u32 = 1;

/// The only supported push protocol version.
pub const PUSH_VERSION: u32 = 1;

/// Pull request from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Protocol version.
    pub pull_version: u32,
    /// Client schema version.
    #[serde(default)]
    pub schema_version: String,
    /// Client profile (browser profile / install) id.
    #[serde(rename = "profileID", default)]
    pub profile_id: String,
    /// Cookie from the previous pull, `None` on the first one.
    pub cookie: Option<Cookie>,
    /// The pulling client group.
    #[serde(rename = "clientGroupID")]
    pub client_group_id: String,
}

impl PullRequest {
    /// Creates a version 1 pull request.
    pub fn new(client_group_id: Uuid, cookie: Option<u64>) -> Self {
        Self {
            pull_version: PULL_VERSION,
            schema_version: String::new(),
            profile_id: String::new(),
            cookie: cookie.map(Cookie::new),
            client_group_id: client_group_id.to_string(),
        }
    }

    /// Validates the request, returning the client group id.
    pub fn validate(&self) -> ProtocolResult<Uuid> {
        parse_uuid("clientGroupID", &self.client_group_id)
    }
}

/// Successful pull response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullOk {
    /// Ordered patch to apply to the client cache.
    pub patch: Vec<PatchOperation>,
    /// Cookie to send with the next pull.
    pub cookie: u64,
    /// New last mutation ids for clients of the group that changed.
    #[serde(rename = "lastMutationIDChanges")]
    pub last_mutation_id_changes: BTreeMap<String, u64>,
}

impl PullOk {
    /// A response that changes nothing and keeps the cookie.
    pub fn unchanged(cookie: u64) -> Self {
        Self {
            patch: Vec::new(),
            cookie,
            last_mutation_id_changes: BTreeMap::new(),
        }
    }

    /// Returns true if the patch starts with a clear.
    pub fn is_reset(&self) -> bool {
        matches!(self.patch.first(), Some(PatchOperation::Clear))
    }
}

/// Which endpoint a version error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionType {
    /// `pullVersion` was rejected.
    Pull,
    /// `pushVersion` was rejected.
    Push,
    /// `schemaVersion` was rejected.
    Schema,
}

/// Structured protocol error carried in a normal response body.
///
/// Clients are expected to hard-fail on `VersionNotSupported` and to reset
/// local state on `ClientStateNotFound`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error")]
pub enum ErrorResponse {
    /// The request's protocol version is not supported.
    VersionNotSupported {
        /// Which version was rejected.
        #[serde(rename = "versionType")]
        version_type: VersionType,
    },
    /// The server has no record of the client's state.
    ClientStateNotFound,
}

/// Pull response: a patch or a structured protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PullResponse {
    /// Patch to apply.
    Ok(PullOk),
    /// Protocol error.
    Error(ErrorResponse),
}

impl PullResponse {
    /// Returns the successful response, if any.
    pub fn ok(&self) -> Option<&PullOk> {
        match self {
            PullResponse::Ok(ok) => Some(ok),
            PullResponse::Error(_) => None,
        }
    }
}

/// A mutation queued by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Per-client, gapless, starting at 1.
    pub id: u64,
    /// Name of the authoritative mutator to run.
    pub name: String,
    /// Mutator arguments.
    #[serde(default)]
    pub args: Value,
    /// The client that created the mutation.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Client-side creation time in milliseconds.
    #[serde(default)]
    pub timestamp: f64,
}

impl Mutation {
    /// Creates a mutation.
    pub fn new(client_id: Uuid, id: u64, name: impl Into<String>, args: Value) -> Self {
        Self {
            id,
            name: name.into(),
            args,
            client_id: client_id.to_string(),
            timestamp: 0.0,
        }
    }

    /// Validates the mutation, returning the client id.
    pub fn validate(&self) -> ProtocolResult<Uuid> {
        let client_id = parse_uuid("clientID", &self.client_id)?;
        if self.id == 0 {
            return Err(ProtocolError::ZeroMutationId {
                client_id: self.client_id.clone(),
            });
        }
        if self.name.is_empty() {
            return Err(ProtocolError::EmptyMutationName { id: self.id });
        }
        Ok(client_id)
    }
}

/// Push request from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Protocol version.
    pub push_version: u32,
    /// The pushing client group.
    #[serde(rename = "clientGroupID")]
    pub client_group_id: String,
    /// Mutations in client order.
    pub mutations: Vec<Mutation>,
    /// Client profile id.
    #[serde(rename = "profileID", default)]
    pub profile_id: String,
    /// Client schema version.
    #[serde(default)]
    pub schema_version: String,
}

impl PushRequest {
    /// Creates a version 1 push request.
    pub fn new(client_group_id: Uuid, mutations: Vec<Mutation>) -> Self {
        Self {
            push_version: PUSH_VERSION,
            client_group_id: client_group_id.to_string(),
            mutations,
            profile_id: String::new(),
            schema_version: String::new(),
        }
    }

    /// Validates the request, returning the client group id.
    pub fn validate(&self) -> ProtocolResult<Uuid> {
        let group_id = parse_uuid("clientGroupID", &self.client_group_id)?;
        for mutation in &self.mutations {
            mutation.validate()?;
        }
        Ok(group_id)
    }
}

/// Push response: `null` on success, or a structured protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PushResponse {
    /// All mutations were processed.
    Ok,
    /// Protocol error; the rest of the batch was not processed.
    Error(ErrorResponse),
}

impl PushResponse {
    /// Returns true on success.
    pub fn is_ok(&self) -> bool {
        matches!(self, PushResponse::Ok)
    }
}
