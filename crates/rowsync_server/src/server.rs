//! Main sync server.

use crate::access::AccessMatrix;
use crate::auth::AuthContext;
use crate::config::ServerConfig;
use crate::error::{SyncError, SyncResult};
use crate::fanout::{NoopPublisher, Publisher};
use crate::handler::{HandlerContext, RequestHandler};
use crate::mutator::MutatorRegistry;
use crate::push::PushOutcome;
use crate::sweeper::{sweep_once, Sweeper};
use rowsync_protocol::{PullRequest, PullResponse, PushRequest};
use rowsync_store::{now_millis, Store, SweepStats};
use std::sync::Arc;
use tracing::info;

/// The sync server.
///
/// Owns the access matrix, mutator registry and publisher, and serves
/// pull and push requests against a [`Store`].
///
/// # Example
///
/// ```
/// use rowsync_server::{AccessMatrix, MutatorRegistry, ServerConfig, SyncServer};
/// use rowsync_store::MemoryStore;
/// use std::sync::Arc;
///
/// let server = SyncServer::builder(Arc::new(MemoryStore::new()))
///     .config(ServerConfig::default())
///     .matrix(AccessMatrix::default())
///     .mutators(MutatorRegistry::new())
///     .build()
///     .unwrap();
/// assert!(server.context().resolver.syncable_tables().is_empty());
/// ```
#[derive(Debug)]
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Starts building a server over `store`.
    pub fn builder(store: Arc<dyn Store>) -> SyncServerBuilder {
        SyncServerBuilder::new(store)
    }

    /// The shared handler context.
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Handles a pull request.
    pub async fn handle_pull(
        &self,
        auth: &AuthContext,
        request: PullRequest,
    ) -> SyncResult<PullResponse> {
        self.handler.handle_pull(auth, request).await
    }

    /// Handles a push request.
    pub async fn handle_push(
        &self,
        auth: &AuthContext,
        request: PushRequest,
    ) -> SyncResult<PushOutcome> {
        self.handler.handle_push(auth, request).await
    }

    /// Runs one retention sweep now.
    pub async fn sweep_once(&self) -> SyncResult<SweepStats> {
        let config = &self.context.config;
        sweep_once(
            self.context.store.as_ref(),
            &config.retry,
            config.client_retention,
            now_millis(),
        )
        .await
    }

    /// Spawns the periodic retention sweeper.
    pub fn spawn_sweeper(&self) -> Sweeper {
        let config = &self.context.config;
        Sweeper::spawn(
            Arc::clone(&self.context.store),
            config.retry.clone(),
            config.client_retention,
            config.sweep_interval,
        )
    }
}

/// Builder for [`SyncServer`].
pub struct SyncServerBuilder {
    store: Arc<dyn Store>,
    config: ServerConfig,
    matrix: Option<AccessMatrix>,
    mutators: MutatorRegistry,
    publisher: Arc<dyn Publisher>,
}

impl SyncServerBuilder {
    /// Creates a builder with default configuration, no mutators and a
    /// publisher that discards pokes.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: ServerConfig::default(),
            matrix: None,
            mutators: MutatorRegistry::new(),
            publisher: Arc::new(NoopPublisher),
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the access matrix.
    pub fn matrix(mut self, matrix: AccessMatrix) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// Sets the mutator registry.
    pub fn mutators(mut self, mutators: MutatorRegistry) -> Self {
        self.mutators = mutators;
        self
    }

    /// Sets the poke publisher.
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Builds the server.
    ///
    /// # Errors
    ///
    /// [`SyncError::Config`] if no access matrix was set or the
    /// configuration is unusable.
    pub fn build(self) -> SyncResult<SyncServer> {
        let matrix = self
            .matrix
            .ok_or_else(|| SyncError::Config("no access matrix".into()))?;
        if self.config.max_push_batch == 0 {
            return Err(SyncError::Config("max_push_batch must be positive".into()));
        }
        if self.config.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry.max_attempts must be positive".into()));
        }

        info!(
            tables = matrix.tables().len(),
            mutators = self.mutators.len(),
            "sync server configured"
        );

        let context = Arc::new(HandlerContext::new(
            self.config,
            self.store,
            matrix,
            self.mutators,
            self.publisher,
        ));
        let handler = RequestHandler::new(Arc::clone(&context));
        Ok(SyncServer { handler, context })
    }
}
