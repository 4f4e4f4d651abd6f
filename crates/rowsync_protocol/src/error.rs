//! Request validation errors.

use thiserror::Error;
use uuid::Uuid;

/// Result type for protocol validation.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A request that is well-formed JSON but violates the protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A field that must hold a UUID does not.
    #[error("invalid {field}: {value:?} is not a uuid")]
    InvalidUuid {
        /// Wire name of the field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A mutation id of zero; ids start at 1.
    #[error("mutation ids start at 1, got 0 for client {client_id}")]
    ZeroMutationId {
        /// The offending client.
        client_id: String,
    },

    /// A mutation with an empty name.
    #[error("mutation {id} has an empty name")]
    EmptyMutationName {
        /// The offending mutation id.
        id: u64,
    },
}

/// Parses a UUID-valued request field.
pub fn parse_uuid(field: &'static str, value: &str) -> ProtocolResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| ProtocolError::InvalidUuid {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid("clientGroupID", &id.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_invalid_uuid() {
        let err = parse_uuid("clientGroupID", "not-a-uuid").unwrap_err();
        assert!(err.to_string().contains("clientGroupID"));
    }
}
