//! Serve command implementation.

use rowsync_server::{router, BroadcastPublisher, RetryConfig, ServerConfig, SyncServer};
use rowsync_store::MemoryStore;
use rowsync_testkit::{demo_matrix, demo_mutators, seed_demo_data};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Options of the serve command.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Listen address.
    pub bind: SocketAddr,
    /// Push batch limit.
    pub max_push_batch: usize,
    /// Patch fetch chunk size.
    pub fetch_chunk_size: usize,
    /// CVR versions kept per group.
    pub cvr_retention: u64,
    /// Idle hours before a group is swept.
    pub client_retention_hours: u64,
    /// Seconds between sweeps.
    pub sweep_interval_secs: u64,
    /// Transaction attempts.
    pub max_attempts: u32,
    /// Whether to seed the demo data.
    pub seed: bool,
}

impl ServeOptions {
    fn config(&self) -> ServerConfig {
        ServerConfig::new(self.bind)
            .with_max_push_batch(self.max_push_batch)
            .with_fetch_chunk_size(self.fetch_chunk_size)
            .with_cvr_retention_versions(self.cvr_retention)
            .with_client_retention(Duration::from_secs(self.client_retention_hours * 3600))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs.max(1)))
            .with_retry(RetryConfig::new(self.max_attempts))
    }
}

/// Runs the serve command until Ctrl-C.
pub async fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::new());
    if options.seed {
        seed_demo_data(&store).await?;
        info!("seeded demo data");
    }

    let publisher = Arc::new(BroadcastPublisher::default());
    let mut pokes = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match pokes.recv().await {
                Ok((channel, _)) => debug!(%channel, "poke"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "poke log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let server = SyncServer::builder(store)
        .config(options.config())
        .matrix(demo_matrix()?)
        .mutators(demo_mutators())
        .publisher(publisher)
        .build()?;
    let server = Arc::new(server);
    let sweeper = server.spawn_sweeper();

    let listener = TcpListener::bind(options.bind).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(Arc::clone(&server)))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    sweeper.stop().await;
    info!("server stopped");
    Ok(())
}
