//! Authoritative mutators.
//!
//! A mutator is the server-side implementation of a named client mutation.
//! It runs inside the push transaction and returns the channels to poke
//! once that transaction commits.

use crate::auth::AuthContext;
use crate::error::SyncError;
use crate::resolver::Resolver;
use async_trait::async_trait;
use rowsync_store::{StoreError, StoreTx};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Opaque poke destination.
pub type Channel = String;

/// Business failure of a mutator.
#[derive(Error, Debug)]
pub enum MutatorError {
    /// Arguments did not match the mutator's schema.
    #[error("invalid arguments: {0}")]
    InvalidArgs(#[from] serde_json::Error),

    /// A referenced row does not exist.
    #[error("{table}/{id} not found")]
    NotFound {
        /// Table.
        table: String,
        /// Row id.
        id: String,
    },

    /// The mutation violates a business rule.
    #[error("rejected: {0}")]
    Rejected(String),

    /// No mutator is registered under the name.
    #[error("unknown mutator {0:?}")]
    Unknown(String),

    /// A resolver, registry or store failure.
    #[error(transparent)]
    Sync(Box<SyncError>),
}

impl From<SyncError> for MutatorError {
    fn from(err: SyncError) -> Self {
        MutatorError::Sync(Box::new(err))
    }
}

impl From<StoreError> for MutatorError {
    fn from(err: StoreError) -> Self {
        MutatorError::Sync(Box::new(SyncError::Store(err)))
    }
}

/// Deserializes mutator arguments.
pub fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, MutatorError> {
    Ok(T::deserialize(args)?)
}

/// Everything a mutator knows about the mutation it is applying.
#[derive(Debug, Clone, Copy)]
pub struct MutationContext<'a> {
    /// The pushing user.
    pub auth: &'a AuthContext,
    /// Access control, for permission checks.
    pub resolver: &'a Resolver,
    /// The client that created the mutation.
    pub client_id: Uuid,
    /// The client's group.
    pub client_group_id: Uuid,
    /// Per-client mutation id.
    pub mutation_id: u64,
    /// Client-side creation time in milliseconds.
    pub timestamp: f64,
}

/// A named server-side mutation.
#[async_trait]
pub trait Mutator: Send + Sync {
    /// Applies the mutation inside `tx`, returning channels to poke.
    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &MutationContext<'_>,
        args: &Value,
    ) -> Result<Vec<Channel>, MutatorError>;
}

/// Mutators by name.
#[derive(Clone, Default)]
pub struct MutatorRegistry {
    mutators: HashMap<String, Arc<dyn Mutator>>,
}

impl MutatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mutator, replacing any previous one with the same name.
    pub fn register(mut self, name: impl Into<String>, mutator: impl Mutator + 'static) -> Self {
        self.mutators.insert(name.into(), Arc::new(mutator));
        self
    }

    /// Looks up a mutator.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Mutator>> {
        self.mutators.get(name)
    }

    /// Number of registered mutators.
    pub fn len(&self) -> usize {
        self.mutators.len()
    }

    /// Returns true if no mutator is registered.
    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }
}

impl fmt::Debug for MutatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.mutators.keys().collect();
        names.sort();
        f.debug_struct("MutatorRegistry").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl Mutator for Noop {
        async fn apply(
            &self,
            _tx: &mut dyn StoreTx,
            ctx: &MutationContext<'_>,
            _args: &Value,
        ) -> Result<Vec<Channel>, MutatorError> {
            Ok(vec![ctx.auth.user_id.clone()])
        }
    }

    #[derive(Deserialize)]
    struct Args {
        id: String,
    }

    #[test]
    fn registry_lookup() {
        let registry = MutatorRegistry::new().register("noop", Noop);
        assert!(registry.get("noop").is_some());
        assert!(registry.get("other").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn args_parsing() {
        let args: Args = parse_args(&json!({"id": "o1"})).unwrap();
        assert_eq!(args.id, "o1");

        let err = parse_args::<Args>(&json!({"nope": 1})).err().unwrap();
        assert!(matches!(err, MutatorError::InvalidArgs(_)));
    }

    #[test]
    fn store_errors_nest() {
        let err = MutatorError::from(StoreError::Deadlock("x".into()));
        assert!(matches!(err, MutatorError::Sync(ref inner) if inner.is_retryable()));
    }
}
