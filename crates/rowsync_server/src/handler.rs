//! Request handlers for sync endpoints.

use crate::access::AccessMatrix;
use crate::auth::AuthContext;
use crate::config::ServerConfig;
use crate::error::SyncResult;
use crate::fanout::{Fanout, Publisher};
use crate::mutator::MutatorRegistry;
use crate::pull::handle_pull;
use crate::push::{handle_push, PushOutcome};
use crate::resolver::Resolver;
use rowsync_protocol::{PullRequest, PullResponse, PushRequest};
use rowsync_store::Store;
use std::fmt;
use std::sync::Arc;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Backing store.
    pub store: Arc<dyn Store>,
    /// Access control over the matrix.
    pub resolver: Resolver,
    /// Authoritative mutators.
    pub mutators: MutatorRegistry,
    /// Post-commit pokes.
    pub fanout: Fanout,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn Store>,
        matrix: AccessMatrix,
        mutators: MutatorRegistry,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let fanout = Fanout::new(publisher, config.publish_timeout);
        Self {
            config,
            store,
            resolver: Resolver::new(matrix),
            mutators,
            fanout,
        }
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .field("mutators", &self.mutators)
            .finish_non_exhaustive()
    }
}

/// Handler for sync requests.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// The shared context.
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    /// Handles a pull request.
    pub async fn handle_pull(
        &self,
        auth: &AuthContext,
        request: PullRequest,
    ) -> SyncResult<PullResponse> {
        handle_pull(&self.context, auth, request).await
    }

    /// Handles a push request.
    pub async fn handle_push(
        &self,
        auth: &AuthContext,
        request: PushRequest,
    ) -> SyncResult<PushOutcome> {
        handle_push(&self.context, auth, request).await
    }
}
