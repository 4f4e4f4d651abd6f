//! Error types for the sync server.

use crate::access::Action;
use crate::mutator::MutatorError;
use rowsync_protocol::{ProtocolError, VersionType};
use rowsync_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for server operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed or invalid request. Never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No usable identity.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller does not own the client group or client it named.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The access matrix denies the action.
    #[error("access denied: cannot {action} {table}")]
    AccessDenied {
        /// Table acted on.
        table: String,
        /// Denied action.
        action: Action,
    },

    /// Unsupported protocol version.
    #[error("{0:?} version not supported")]
    VersionNotSupported(VersionType),

    /// The server has no state for a client that claims prior mutations.
    #[error("client state not found")]
    ClientStateNotFound,

    /// A mutation id skipped ahead of the client's counter.
    #[error("mutation conflict for client {client_id}: expected {expected}, got {actual}")]
    MutationConflict {
        /// The pushing client.
        client_id: Uuid,
        /// The next id the server accepts.
        expected: u64,
        /// The id that was pushed.
        actual: u64,
    },

    /// The authoritative mutator failed.
    #[error("mutation {name} failed: {source}")]
    Mutation {
        /// Mutator name.
        name: String,
        /// Underlying failure.
        #[source]
        source: MutatorError,
    },

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The transaction kept failing with transient errors.
    #[error("too many retries: gave up after {attempts} attempts, last error: {last_error}")]
    TooManyRetries {
        /// Attempts made.
        attempts: u32,
        /// The final transient error.
        last_error: String,
    },

    /// Invalid server setup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::BadRequest(err.to_string())
    }
}

impl SyncError {
    /// Returns true if the whole transaction may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(err) => err.is_transient(),
            SyncError::Mutation {
                source: MutatorError::Sync(inner),
                ..
            } => inner.is_retryable(),
            _ => false,
        }
    }

    /// Returns true for unrecoverable protocol-level errors that are
    /// reported as structured responses.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SyncError::VersionNotSupported(_) | SyncError::ClientStateNotFound
        )
    }

    /// Returns true for failures of a single mutation that error mode
    /// absorbs.
    ///
    /// Of the errors a mutator can raise through [`MutatorError::Sync`],
    /// only access denials and bad requests are business failures. Store,
    /// identity and protocol errors abort the batch instead.
    pub fn is_mutation_failure(&self) -> bool {
        match self {
            SyncError::MutationConflict { .. } => true,
            SyncError::Mutation {
                source: MutatorError::Sync(inner),
                ..
            } => {
                matches!(
                    **inner,
                    SyncError::AccessDenied { .. } | SyncError::BadRequest(_)
                ) || inner.is_mutation_failure()
            }
            SyncError::Mutation { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::BadRequest(_)
                | SyncError::Unauthenticated(_)
                | SyncError::Unauthorized(_)
                | SyncError::AccessDenied { .. }
                | SyncError::VersionNotSupported(_)
                | SyncError::ClientStateNotFound
                | SyncError::MutationConflict { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}
