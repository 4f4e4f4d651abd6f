//! Test fixtures and server helpers.
//!
//! [`TestServer`] wires a [`SyncServer`] over a [`MemoryStore`] seeded with
//! the demo schema, a [`RecordingPublisher`], and shortcuts for pulling,
//! pushing and inspecting the store.

use crate::mutators::demo_mutators;
use crate::schema::{
    demo_matrix, BILLING_ACCOUNTS, BILLING_ACCOUNT_MANAGERS, COMMENTS, ORDERS, ROOMS,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rowsync_protocol::{Mutation, PullOk, PullRequest, PushRequest};
use rowsync_server::{
    router, AuthContext, Poke, PublishError, Publisher, PushOutcome, Role, ServerConfig,
    SyncResult, SyncServer,
};
use rowsync_store::{MemoryStore, Row, Store, StoreResult, StoreTx};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Tenant the demo data is seeded into.
pub const TENANT: &str = "acme";
/// A second tenant holding rows no `TENANT` user may ever see.
pub const OTHER_TENANT: &str = "globex";

/// Administrator of `TENANT`.
pub const ADMIN: &str = "admin-1";
/// Operator of `TENANT`.
pub const OPERATOR: &str = "op-1";
/// Manager assigned to `ba-1`.
pub const MANAGER: &str = "m-1";
/// Manager assigned to `ba-2`.
pub const OTHER_MANAGER: &str = "m-2";
/// Customer owning `ba-1`.
pub const CUSTOMER: &str = "c-1";
/// Customer owning `ba-2`.
pub const OTHER_CUSTOMER: &str = "c-2";

/// A publisher that records every poke.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    pokes: Mutex<Vec<String>>,
    notify: Notify,
}

impl RecordingPublisher {
    /// Creates an empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels poked so far, in publish order.
    pub fn channels(&self) -> Vec<String> {
        self.pokes.lock().clone()
    }

    /// Forgets recorded pokes.
    pub fn clear(&self) {
        self.pokes.lock().clear();
    }

    /// Waits until `channel` was poked, up to `timeout`.
    pub async fn wait_for(&self, channel: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.pokes.lock().iter().any(|c| c == channel) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, channel: &str, _poke: Poke) -> Result<(), PublishError> {
        self.pokes.lock().push(channel.to_string());
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Converts a JSON object literal into row fields.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A seeded sync server for tests.
pub struct TestServer {
    /// The server.
    pub server: Arc<SyncServer>,
    /// Its store.
    pub store: Arc<MemoryStore>,
    /// Its publisher.
    pub publisher: Arc<RecordingPublisher>,
}

impl TestServer {
    /// Creates a seeded server with fast retries.
    pub async fn new() -> Self {
        let retry = rowsync_server::RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false);
        Self::with_config(ServerConfig::default().with_retry(retry)).await
    }

    /// Creates a seeded server with the given configuration.
    pub async fn with_config(config: ServerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        seed_demo_data(&store).await.expect("seed failed");

        let publisher = Arc::new(RecordingPublisher::new());
        let server = SyncServer::builder(store.clone())
            .config(config)
            .matrix(demo_matrix().expect("demo matrix is valid"))
            .mutators(demo_mutators())
            .publisher(publisher.clone())
            .build()
            .expect("Failed to build server");

        Self {
            server: Arc::new(server),
            store,
            publisher,
        }
    }

    /// An identity in the demo tenant.
    pub fn auth(&self, user: &str, role: Role) -> AuthContext {
        AuthContext::new(TENANT, user, role)
    }

    /// An HTTP router over this server.
    pub fn router(&self) -> axum::Router {
        router(Arc::clone(&self.server))
    }

    /// Pulls, panicking on errors and structured responses.
    pub async fn pull(&self, auth: &AuthContext, group: Uuid, cookie: Option<u64>) -> PullOk {
        let response = self
            .server
            .handle_pull(auth, PullRequest::new(group, cookie))
            .await
            .expect("pull failed");
        response.ok().cloned().expect("pull returned an error response")
    }

    /// Pushes a batch.
    pub async fn push(
        &self,
        auth: &AuthContext,
        group: Uuid,
        mutations: Vec<Mutation>,
    ) -> SyncResult<PushOutcome> {
        self.server
            .handle_push(auth, PushRequest::new(group, mutations))
            .await
    }

    /// Reads a row of the demo tenant, soft-deleted or not.
    pub async fn row(&self, table: &str, id: &str) -> Option<Row> {
        let mut tx = self.store.begin().await.expect("begin failed");
        tx.row(TENANT, table, id).await.expect("read failed")
    }

    /// Writes a row of the demo tenant directly, bypassing mutators.
    pub async fn upsert(&self, table: &str, id: &str, value: Value) -> Row {
        let mut tx = self.store.begin().await.expect("begin failed");
        let row = tx
            .upsert_row(TENANT, table, id, fields(value))
            .await
            .expect("upsert failed");
        tx.commit().await.expect("commit failed");
        row
    }

    /// Soft-deletes a row of the demo tenant directly.
    pub async fn soft_delete(&self, table: &str, id: &str) {
        let mut tx = self.store.begin().await.expect("begin failed");
        tx.soft_delete_row(TENANT, table, id)
            .await
            .expect("delete failed");
        tx.commit().await.expect("commit failed");
    }

    /// The stored last mutation id of a client.
    pub async fn last_mutation_id(&self, client: Uuid) -> Option<u64> {
        let mut tx = self.store.begin().await.expect("begin failed");
        tx.client(TENANT, client)
            .await
            .expect("read failed")
            .map(|c| c.last_mutation_id)
    }
}

/// Seeds the demo tenant and a second tenant.
pub async fn seed_demo_data(store: &MemoryStore) -> StoreResult<()> {
    let rows: Vec<(&str, &str, &str, Value)> = vec![
        (TENANT, BILLING_ACCOUNTS, "ba-1", json!({"name": "Acme East", "customerId": CUSTOMER})),
        (TENANT, BILLING_ACCOUNTS, "ba-2", json!({"name": "Acme West", "customerId": OTHER_CUSTOMER})),
        (TENANT, BILLING_ACCOUNT_MANAGERS, "bam-1", json!({"billingAccountId": "ba-1", "managerId": MANAGER})),
        (TENANT, BILLING_ACCOUNT_MANAGERS, "bam-2", json!({"billingAccountId": "ba-2", "managerId": OTHER_MANAGER})),
        (
            TENANT,
            ORDERS,
            "o-1",
            json!({"billingAccountId": "ba-1", "customerId": CUSTOMER, "description": "Widgets", "status": "open"}),
        ),
        (
            TENANT,
            ORDERS,
            "o-2",
            json!({"billingAccountId": "ba-2", "customerId": OTHER_CUSTOMER, "description": "Gadgets", "status": "open"}),
        ),
        (
            TENANT,
            COMMENTS,
            "k-1",
            json!({"orderId": "o-1", "customerId": CUSTOMER, "authorId": CUSTOMER, "body": "When?", "internal": false}),
        ),
        (
            TENANT,
            COMMENTS,
            "k-2",
            json!({"orderId": "o-1", "customerId": CUSTOMER, "authorId": MANAGER, "body": "Late payer", "internal": true}),
        ),
        (TENANT, ROOMS, "r-1", json!({"name": "Support", "customerId": CUSTOMER})),
        (
            OTHER_TENANT,
            ORDERS,
            "o-1",
            json!({"billingAccountId": "ba-1", "customerId": CUSTOMER, "description": "Not yours", "status": "open"}),
        ),
    ];

    let mut tx = store.begin().await?;
    for (tenant, table, id, value) in rows {
        tx.upsert_row(tenant, table, id, fields(value)).await?;
    }
    tx.commit().await
}
