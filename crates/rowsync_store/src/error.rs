//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction could not be serialized against a concurrent one.
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// The transaction was chosen as a deadlock victim.
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// A row or record violated a store constraint.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The backing store is unreachable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if retrying the whole transaction may succeed.
    ///
    /// Only serialization failures and deadlocks are transient; everything
    /// else is surfaced to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::SerializationFailure(_) | StoreError::Deadlock(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::SerializationFailure("x".into()).is_transient());
        assert!(StoreError::Deadlock("x".into()).is_transient());
        assert!(!StoreError::Unavailable("x".into()).is_transient());
        assert!(!StoreError::Constraint("x".into()).is_transient());
    }

    #[test]
    fn error_display() {
        let err = StoreError::Deadlock("victim".into());
        assert_eq!(err.to_string(), "deadlock detected: victim");
    }
}
